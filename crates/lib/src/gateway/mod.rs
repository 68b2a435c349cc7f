//! Gateway: HTTP surface of the service.
//!
//! `GET /` health, `POST /research` synchronous answers, `POST /callback` LINE webhook
//! (answered out-of-band through the dispatch pool).

mod protocol;
mod server;

pub use protocol::{ErrorResponse, HealthResponse, ResearchRequest, ResearchResponse};
pub use server::{build_router, build_state, run_gateway, serve, GatewayState, LineEndpoint};
