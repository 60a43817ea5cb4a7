/*! Client state machines.

A client does no I/O of its own. Everything that happens to it is fed in as
an [Event](dhcpv6/enum.Event.html), and everything it wants done is handed
back as a list of [Actions](dhcpv6/enum.Action.html) for the
[iface](../iface/index.html) layer, or any other driver, to perform in order.
*/

pub mod dhcpv6;
