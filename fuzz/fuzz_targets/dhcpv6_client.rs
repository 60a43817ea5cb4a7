#![no_main]
use std::net::Ipv6Addr;

use arbitrary::Arbitrary;
use dhcpv6_client::socket::dhcpv6::{
    Action, Client, ClientConfig, Event, Identity, LinkInfo, Mode,
};
use dhcpv6_client::time::{Duration, Instant};
use dhcpv6_client::wire::{Dhcpv6Packet, Duid};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Input {
    /// A datagram, with its transaction ID replaced by the client's.
    Receive(Vec<u8>),
    Fire,
    Advance(u16),
    Link { up: bool, network: Option<u8> },
    Wake,
    Conflict,
    TransmitFailed,
    Stop,
}

#[derive(Debug, Arbitrary)]
struct Run {
    mode: u8,
    seed: u64,
    inputs: Vec<Input>,
}

fn link(up: bool, network: Option<u8>) -> LinkInfo {
    if up {
        LinkInfo::up(network.map(|n| format!("net{}", n)).as_deref())
    } else {
        LinkInfo::down()
    }
}

#[derive(Default)]
struct Host {
    timer: Option<(Instant, u32)>,
    address: Option<Ipv6Addr>,
}

impl Host {
    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::ArmTimer { at, token } => self.timer = Some((at, token)),
                Action::CancelTimer => self.timer = None,
                Action::SetAddress(config) => self.address = Some(config.address),
                Action::RemoveAddress(address) if self.address == Some(address) => {
                    self.address = None
                }
                _ => {}
            }
        }
    }
}

fuzz_target!(|run: Run| {
    let mode = match run.mode % 3 {
        0 => Mode::Stateless,
        1 => Mode::StatefulAddress,
        _ => Mode::StatefulPrefix,
    };
    let identity = Identity::new(Duid::uuid([0x5a; 16]), 1);
    let mut client = Client::new(ClientConfig::new("fuzz0", 1, mode), identity, run.seed);
    let mut now = Instant::from_secs(1000);
    let mut host = Host::default();

    let actions = client.handle(now, Event::Start(LinkInfo::up(None)));
    host.apply(actions);

    for input in run.inputs {
        let actions = match input {
            Input::Receive(mut data) => {
                if data.len() >= 4 {
                    let xid = client.transaction_id().to_be_bytes();
                    data[1..4].copy_from_slice(&xid[1..]);
                }
                let packet = match Dhcpv6Packet::new_checked(&data[..]) {
                    Ok(packet) => packet,
                    Err(_) => continue,
                };
                let options = match packet.option_list() {
                    Ok(options) => options,
                    Err(_) => continue,
                };
                client.handle(now, Event::Receive { packet: &data[..], options })
            }
            Input::Fire => match host.timer.take() {
                Some((at, token)) => {
                    now = now.max(at);
                    client.handle(now, Event::Timeout(token))
                }
                None => continue,
            },
            Input::Advance(secs) => {
                now += Duration::from_secs(secs.into());
                continue;
            }
            Input::Link { up, network } => client.handle(now, Event::LinkChanged(link(up, network))),
            Input::Wake => {
                let link = client.link().clone();
                client.handle(now, Event::Wake(link))
            }
            Input::Conflict => match host.address {
                Some(conflict) => client.handle(now, Event::AddressInUse(conflict)),
                None => continue,
            },
            Input::TransmitFailed => client.handle(now, Event::TransmitFailed),
            Input::Stop => client.handle(now, Event::Stop),
        };
        host.apply(actions);
        let _ = client.info();
    }
});
