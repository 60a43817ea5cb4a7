#![no_main]
use dhcpv6_client::wire::{Dhcpv6Packet, Dhcpv6Repr, IaKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let packet = match Dhcpv6Packet::new_checked(data) {
        Ok(packet) => packet,
        Err(_) => return,
    };
    if let Ok(options) = packet.option_list() {
        for option in options.iter() {
            let _ = option.data.len();
        }
        let _ = options.status_code();
        let _ = options.preference();
        let _ = options.dns_servers().map(|list| list.iter().count());
        let _ = options.domain_list();
        for kind in [IaKind::NonTemporary, IaKind::PrefixDelegation] {
            let _ = options.binding(kind);
        }
        let _ = options.index();
    }
    if let Ok(repr) = Dhcpv6Repr::parse(&packet) {
        if let Ok(bytes) = repr.to_bytes() {
            let again = Dhcpv6Packet::new_checked(&bytes[..]).expect("emitted message is valid");
            assert!(Dhcpv6Repr::parse(&again).is_ok());
        }
    }
});
