/// Marker for the version-independent representation of a custom resource.
///
/// Every served version converts into its hub with `From`, so controller
/// code only ever deals with the hub.
pub trait Hub {}
