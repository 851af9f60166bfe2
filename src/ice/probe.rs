/**
 * Server probes: one attempt at obtaining a candidate from an ICE server
 */
use async_trait::async_trait;
use slog::{debug, trace, warn, Logger};
use tokio::time::Duration;

use crate::error::IceError;
use crate::ice::candidate::{CandidateType, IceCandidate, IceComponent, IceProtocol};
use crate::ice::server::{ServerScheme, ValidatedServer};
use crate::net::{self, LocalSocket};
use crate::stun::attributes::attribute_type::{
    ATTR_ERROR_CODE, ATTR_MAPPED_ADDRESS, ATTR_SOFTWARE, ATTR_XOR_MAPPED_ADDRESS,
};
use crate::stun::{self, AttributeValue, StunMessageType, StunPacket};
use crate::utils::{format_transaction_id, hex_encode_delimited};

/// Error code reported for servers that cannot be reached or resolved.
pub const SERVER_UNREACHABLE: u16 = 701;

/**
 * What a probe produced. Server side failures are reported rather than
 * raised, only local failures (sockets, encoding) abort gathering.
 */
#[derive(Debug)]
pub enum ProbeOutcome {
    /// A candidate and the socket backing it
    Candidate {
        candidate: IceCandidate,
        socket: LocalSocket,
    },
    /// The server answered with an error, or never answered
    ServerError { error_code: u16, error_text: String },
    /// Nothing could be gathered from this server, move on
    Unavailable,
}

#[async_trait]
pub trait ServerProbe: Send + Sync {
    async fn probe(
        &self,
        server: &ValidatedServer,
        component: IceComponent,
    ) -> Result<ProbeOutcome, IceError>;
}

/**
 * Sends a Binding request and turns the mapped address of the response
 * into a server reflexive candidate.
 */
pub struct StunBindingProbe {
    pub timeout: Duration,
    pub software: String,
    pub logger: Logger,
}

impl StunBindingProbe {
    fn reflexive_candidate(
        &self,
        response: &StunPacket,
        socket: LocalSocket,
        component: IceComponent,
    ) -> Result<ProbeOutcome, IceError> {
        let mapped = response
            .get_attribute(ATTR_XOR_MAPPED_ADDRESS)
            .or_else(|| response.get_attribute(ATTR_MAPPED_ADDRESS))
            .and_then(AttributeValue::as_address)
            .map(|addr| addr.socket_addr());

        let Some(mapped) = mapped else {
            return Ok(ProbeOutcome::ServerError {
                error_code: SERVER_UNREACHABLE,
                error_text: "response carries no mapped address".to_string(),
            });
        };

        let base = socket.local_addr()?;
        let candidate = IceCandidate::new(
            CandidateType::Srflx,
            IceProtocol::Udp,
            mapped,
            base,
            component,
            None,
        )
        .with_related(base);
        Ok(ProbeOutcome::Candidate { candidate, socket })
    }
}

#[async_trait]
impl ServerProbe for StunBindingProbe {
    async fn probe(
        &self,
        server: &ValidatedServer,
        component: IceComponent,
    ) -> Result<ProbeOutcome, IceError> {
        let Some(target) = net::resolve(&server.address, server.port).await else {
            warn!(self.logger, "could not resolve {}", server.address);
            return Ok(ProbeOutcome::ServerError {
                error_code: SERVER_UNREACHABLE,
                error_text: format!("could not resolve {}", server.address),
            });
        };

        let socket = net::connect_udp(target).await?;
        let mut request = StunPacket::new(StunMessageType::BindingRequest, true);
        request.add_attribute(ATTR_SOFTWARE, AttributeValue::Bytes(self.software.clone().into_bytes()))?;
        let encoded = request.encode(None, true)?;

        trace!(
            self.logger,
            "Binding request to {} tid {}: {}",
            target,
            format_transaction_id(request.raw_transaction_id()),
            hex_encode_delimited(&encoded)
        );

        let Some(response) =
            net::stun_exchange(&socket, &encoded, request.raw_transaction_id(), self.timeout).await?
        else {
            warn!(self.logger, "STUN server {} did not answer", target);
            return Ok(ProbeOutcome::ServerError {
                error_code: SERVER_UNREACHABLE,
                error_text: format!("no response from {target}"),
            });
        };

        match response.message_type {
            StunMessageType::BindingResponse => {
                self.reflexive_candidate(&response, LocalSocket::Udp(socket), component)
            }
            StunMessageType::BindingErrorResponse => {
                let (error_code, error_text) = match response.get_attribute(ATTR_ERROR_CODE) {
                    Some(AttributeValue::ErrorCode { code, reason }) => (*code, reason.clone()),
                    _ => (500, stun::error_reason(500).to_string()),
                };
                warn!(self.logger, "STUN server {} answered {} {}", target, error_code, error_text);
                Ok(ProbeOutcome::ServerError {
                    error_code,
                    error_text,
                })
            }
            other => {
                debug!(self.logger, "unexpected {:?} from {}", other, target);
                Ok(ProbeOutcome::Unavailable)
            }
        }
    }
}

/**
 * Placeholder for the schemes that need a secure or relayed transport
 * (stuns, turn, turns). Gathering from them is not implemented, so they
 * never produce a candidate.
 */
pub struct PendingProbe {
    pub logger: Logger,
}

#[async_trait]
impl ServerProbe for PendingProbe {
    async fn probe(
        &self,
        server: &ValidatedServer,
        _component: IceComponent,
    ) -> Result<ProbeOutcome, IceError> {
        debug!(self.logger, "{} gathering not implemented, skipping {}", server.scheme, server.url);
        Ok(ProbeOutcome::Unavailable)
    }
}

/// Picks the probe used for a server, `probe_for` unless overridden.
pub type ProbeFactory = fn(ServerScheme, Duration, &str, &Logger) -> Box<dyn ServerProbe>;

/**
 * Select the probe for a server scheme.
 */
pub fn probe_for(scheme: ServerScheme, timeout: Duration, software: &str, logger: &Logger) -> Box<dyn ServerProbe> {
    match scheme {
        ServerScheme::Stun => Box::new(StunBindingProbe {
            timeout,
            software: software.to_string(),
            logger: logger.clone(),
        }),
        _ => Box::new(PendingProbe {
            logger: logger.clone(),
        }),
    }
}

#[cfg(test)]
pub(crate) fn stun_server(addr: std::net::SocketAddr) -> ValidatedServer {
    ValidatedServer {
        url: format!("stun:{addr}"),
        scheme: ServerScheme::Stun,
        address: addr.ip().to_string(),
        port: addr.port(),
        username: None,
        credential: None,
    }
}
