//! Camera discovery on a local /24 network.
//!
//! Flow:
//!   1. `SubnetScanner` spawns one task per host `.1..=.254`
//!   2. Each task waits on the concurrency gate, then runs `HostProber`
//!   3. `HostProber`: ICMP echo → HTTP(S) fingerprint → stream-port fallback
//!   4. Matches are de-duplicated into a shared `ResultSet` and pushed to the
//!      `ScanObserver` as they arrive; `scan_finished` fires after all tasks settle

pub mod fingerprint;
pub mod prober;
pub mod scanner;
pub mod transport;

pub use prober::{HostProber, Probe};
pub use scanner::{CancelToken, ChannelObserver, ResultSet, ScanObserver, SubnetScanner};
pub use transport::NetTransport;
