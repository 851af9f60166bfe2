/**
 * ICE local candidate gathering, ORTC flavour
 */
pub mod candidate;
pub mod gatherer;
pub mod probe;
pub mod server;

pub use candidate::{
    foundation, local_preference, priority, CandidateType, IceCandidate, IceComponent, IceProtocol,
    RelayProtocol, TcpType,
};
pub use gatherer::{
    GatherOptions, GatherPolicy, GathererEvent, GathererState, IceGatherer, LocalParameters,
    ProbeSettings,
};
pub use server::{CredentialType, IceCredential, IceServer, OAuthCredential, Urls, ValidatedServer};
