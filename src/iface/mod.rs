/*! Running clients against the host.

The `iface` module shares one datagram [Device](../phy/trait.Device.html)
between every client in a process. The [Multiplexer] keeps the device open
while anybody waits for a reply and routes each reply to the client whose
transaction and interface it matches. The [Dispatcher] owns the clients,
their timers and their receive registrations, and carries out the actions
they request against a [Platform].
*/

mod client_set;
mod dispatcher;
mod multiplexer;
mod platform;

pub use self::client_set::{ClientHandle, ClientSet};
pub use self::dispatcher::Dispatcher;
pub use self::multiplexer::{
    Datagram, Multiplexer, Registration, CLOSE_DELAY, MAX_DATAGRAM_LEN, REOPEN_DELAY,
};
pub use self::platform::Platform;
