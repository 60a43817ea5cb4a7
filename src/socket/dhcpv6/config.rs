use core::fmt;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::retransmit::{CNF_MAX_RD, DEC_MAX_RC, INF_MAX_RT, REQ_MAX_RC, SOL_MAX_RT};
use crate::rand::Rand;
use crate::time::Duration;
use crate::wire::dhcpv6::{
    HARDWARE_TYPE_ETHERNET, INFINITY, OPT_CAPTIVE_PORTAL, OPT_DNS_SERVERS, OPT_DOMAIN_LIST,
};
use crate::wire::{Duid, IaKind};

/// What a client asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Information-Request only; no address is leased.
    Stateless,
    /// Lease one address through IA_NA.
    StatefulAddress,
    /// Lease one prefix through IA_PD.
    StatefulPrefix,
}

impl Mode {
    pub fn ia_kind(&self) -> Option<IaKind> {
        match self {
            Mode::Stateless => None,
            Mode::StatefulAddress => Some(IaKind::NonTemporary),
            Mode::StatefulPrefix => Some(IaKind::PrefixDelegation),
        }
    }

    pub fn is_stateful(&self) -> bool {
        *self != Mode::Stateless
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Stateless => write!(f, "stateless"),
            Mode::StatefulAddress => write!(f, "stateful-address"),
            Mode::StatefulPrefix => write!(f, "stateful-prefix"),
        }
    }
}

/// Timeout and retry configuration.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RetryConfig {
    /// Cap on the Solicit retransmission time, until a server overrides it.
    pub sol_max_rt: Duration,
    /// Cap on the Information-Request retransmission time, until a server overrides it.
    pub inf_max_rt: Duration,
    pub req_max_rc: u32,
    pub cnf_max_rd: Duration,
    pub dec_max_rc: u32,
    /// Consecutive transmit failures after which the link is treated as down.
    pub max_transmit_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            sol_max_rt: SOL_MAX_RT,
            inf_max_rt: INF_MAX_RT,
            req_max_rc: REQ_MAX_RC,
            cnf_max_rd: CNF_MAX_RD,
            dec_max_rc: DEC_MAX_RC,
            max_transmit_failures: 3,
        }
    }
}

/// How T1 and T2 are derived when a server leaves them to the client.
///
/// Both are percentages of the preferred lifetime.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RenewalPolicy {
    t1_percent: u8,
    t2_percent: u8,
}

impl RenewalPolicy {
    /// Returns `None` unless `t1_percent <= t2_percent <= 100`.
    pub fn new(t1_percent: u8, t2_percent: u8) -> Option<RenewalPolicy> {
        if t1_percent > t2_percent || t2_percent > 100 {
            return None;
        }
        Some(RenewalPolicy {
            t1_percent,
            t2_percent,
        })
    }

    pub fn t1_percent(&self) -> u8 {
        self.t1_percent
    }

    pub fn t2_percent(&self) -> u8 {
        self.t2_percent
    }

    /// T1 and T2 in seconds for a resource preferred for `preferred_lifetime`
    /// seconds. An infinite preferred lifetime yields infinite timers.
    pub fn derive(&self, preferred_lifetime: u32) -> (u32, u32) {
        if preferred_lifetime == INFINITY {
            return (INFINITY, INFINITY);
        }
        let scale = |percent: u8| (u64::from(preferred_lifetime) * u64::from(percent) / 100) as u32;
        (scale(self.t1_percent), scale(self.t2_percent))
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        RenewalPolicy {
            t1_percent: 50,
            t2_percent: 80,
        }
    }
}

/// Options every client asks for.
pub const DEFAULT_REQUEST_OPTIONS: [u16; 3] = [OPT_DNS_SERVERS, OPT_DOMAIN_LIST, OPT_CAPTIVE_PORTAL];

/// Configuration of one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ifname: String,
    pub ifindex: u32,
    pub mode: Mode,
    pub retry: RetryConfig,
    pub renewal: RenewalPolicy,
    /// Options requested in addition to [DEFAULT_REQUEST_OPTIONS].
    pub request_options: Vec<u16>,
}

impl ClientConfig {
    pub fn new(ifname: &str, ifindex: u32, mode: Mode) -> ClientConfig {
        ClientConfig {
            ifname: ifname.to_string(),
            ifindex,
            mode,
            retry: RetryConfig::default(),
            renewal: RenewalPolicy::default(),
            request_options: Vec::new(),
        }
    }
}

/// Whether interfaces share the process-wide DUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuidPolicy {
    /// One DUID for the whole process, IAIDs allocated per interface name.
    Shared,
    /// A DUID derived from the interface's own link-layer address, IAID 0.
    Private,
}

/// The DUID and IAID a client presents. Fixed for the client's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub duid: Duid,
    pub iaid: u32,
}

impl Identity {
    pub fn new(duid: Duid, iaid: u32) -> Identity {
        Identity { duid, iaid }
    }

    /// Select the identity of interface `ifname` according to `policy`.
    ///
    /// A private identity falls back to the shared DUID if `link_address`
    /// cannot form a DUID-LL.
    pub fn select(
        policy: DuidPolicy,
        shared: &Duid,
        allocator: &mut IaidAllocator,
        ifname: &str,
        link_address: &[u8],
    ) -> Identity {
        match policy {
            DuidPolicy::Shared => Identity::new(shared.clone(), allocator.allocate(ifname)),
            DuidPolicy::Private => match Duid::link_layer(HARDWARE_TYPE_ETHERNET, link_address) {
                Ok(duid) if !link_address.is_empty() => Identity::new(duid, 0),
                _ => {
                    net_debug!("DHCPv6 {}: no link-layer address for a private DUID", ifname);
                    Identity::new(shared.clone(), 0)
                }
            },
        }
    }
}

/// Hands out a stable, distinct IAID per interface name.
#[derive(Debug, Default)]
pub struct IaidAllocator {
    assigned: HashMap<String, u32>,
}

impl IaidAllocator {
    pub fn new() -> IaidAllocator {
        IaidAllocator::default()
    }

    /// Return the IAID of `ifname`, assigning one on first use.
    ///
    /// The IAID is a hash of the name, stepped forward past collisions,
    /// so the same name gets the same IAID in every process.
    pub fn allocate(&mut self, ifname: &str) -> u32 {
        if let Some(iaid) = self.assigned.get(ifname) {
            return *iaid;
        }
        let mut iaid = fnv1a(ifname.as_bytes());
        while self.assigned.values().any(|used| *used == iaid) {
            iaid = iaid.wrapping_add(1);
        }
        self.assigned.insert(ifname.to_string(), iaid);
        iaid
    }

    pub fn release(&mut self, ifname: &str) {
        self.assigned.remove(ifname);
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Seconds between the Unix epoch and 2000-01-01T00:00:00Z, the DUID-LLT epoch.
const DUID_EPOCH: u64 = 946_684_800;

/// Persists the process-wide DUID as raw bytes in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuidStore {
    path: PathBuf,
}

impl DuidStore {
    pub fn new<P: AsRef<Path>>(path: P) -> DuidStore {
        DuidStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored DUID. A missing or unusable file reads as `None`.
    pub fn load(&self) -> io::Result<Option<Duid>> {
        match fs::read(&self.path) {
            Ok(bytes) => match Duid::from_bytes(&bytes) {
                Ok(duid) => Ok(Some(duid)),
                Err(err) => {
                    net_warn!("DHCPv6 ignoring DUID in {}: {}", self.path.display(), err);
                    Ok(None)
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn save(&self, duid: &Duid) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, duid.as_bytes())
    }

    /// Load the stored DUID, or create and store a new one.
    ///
    /// A new DUID is a DUID-LLT over `link_address` when one is given and a
    /// random DUID-UUID otherwise.
    pub fn load_or_create(&self, link_address: Option<&[u8]>) -> io::Result<Duid> {
        if let Some(duid) = self.load()? {
            return Ok(duid);
        }
        let since_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let duid = link_address
            .and_then(|address| {
                let time = since_unix.as_secs().saturating_sub(DUID_EPOCH) as u32;
                Duid::link_layer_time(HARDWARE_TYPE_ETHERNET, time, address).ok()
            })
            .unwrap_or_else(|| {
                let seed = since_unix.as_nanos() as u64 ^ u64::from(std::process::id());
                let mut rand = Rand::new(seed);
                let mut uuid = [0u8; 16];
                for chunk in uuid.chunks_exact_mut(8) {
                    chunk.copy_from_slice(&rand.rand_u64().to_be_bytes());
                }
                // RFC 4122 version 4, variant 1
                uuid[6] = (uuid[6] & 0x0f) | 0x40;
                uuid[8] = (uuid[8] & 0x3f) | 0x80;
                Duid::uuid(uuid)
            });
        self.save(&duid)?;
        net_info!("DHCPv6 created DUID {} in {}", duid, self.path.display());
        Ok(duid)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::DuidType;

    #[test]
    fn test_renewal_policy() {
        let policy = RenewalPolicy::default();
        assert_eq!(policy.derive(3600), (1800, 2880));
        assert_eq!(policy.derive(INFINITY), (INFINITY, INFINITY));
        assert_eq!(policy.derive(0), (0, 0));
        assert_eq!(RenewalPolicy::new(80, 50), None);
        assert_eq!(RenewalPolicy::new(50, 101), None);
        assert_eq!(RenewalPolicy::new(25, 25).map(|p| p.derive(400)), Some((100, 100)));
    }

    #[test]
    fn test_mode() {
        assert_eq!(Mode::Stateless.ia_kind(), None);
        assert_eq!(Mode::StatefulPrefix.ia_kind(), Some(IaKind::PrefixDelegation));
        assert!(Mode::StatefulAddress.is_stateful());
        assert_eq!(Mode::StatefulAddress.to_string(), "stateful-address");
    }

    #[test]
    fn test_iaid_allocator() {
        let mut allocator = IaidAllocator::new();
        let en0 = allocator.allocate("en0");
        assert_eq!(allocator.allocate("en0"), en0);
        assert_eq!(en0, fnv1a(b"en0"));
        let en1 = allocator.allocate("en1");
        assert_ne!(en0, en1);

        let mut other = IaidAllocator::new();
        assert_eq!(other.allocate("en1"), en1);

        allocator.release("en0");
        assert_eq!(allocator.allocate("en0"), en0);
    }

    #[test]
    fn test_identity_policy() {
        let shared = Duid::uuid([1; 16]);
        let mut allocator = IaidAllocator::new();
        let mac = [0x02, 0, 0, 0, 0, 9];

        let identity = Identity::select(DuidPolicy::Shared, &shared, &mut allocator, "en0", &mac);
        assert_eq!(identity.duid, shared);
        assert_eq!(identity.iaid, fnv1a(b"en0"));

        let identity = Identity::select(DuidPolicy::Private, &shared, &mut allocator, "en0", &mac);
        assert_eq!(identity.duid.kind(), DuidType::LinkLayer);
        assert_eq!(identity.iaid, 0);

        let identity = Identity::select(DuidPolicy::Private, &shared, &mut allocator, "lo", &[]);
        assert_eq!(identity.duid, shared);
    }

    #[test]
    fn test_duid_store() {
        let dir = std::env::temp_dir().join(format!("dhcpv6-client-test-{}", std::process::id()));
        let store = DuidStore::new(dir.join("duid"));
        assert_eq!(store.load().unwrap(), None);

        let created = store.load_or_create(Some(&[0x52, 0x54, 0, 1, 2, 3])).unwrap();
        assert_eq!(created.kind(), DuidType::LinkLayerTime);
        assert_eq!(store.load_or_create(None).unwrap(), created);

        fs::write(store.path(), [0u8]).unwrap();
        assert_eq!(store.load().unwrap(), None);
        let uuid = store.load_or_create(None).unwrap();
        assert_eq!(uuid.kind(), DuidType::Uuid);

        fs::remove_dir_all(&dir).unwrap();
    }
}
