use std::future::Future;
use std::net::SocketAddr;
use log::info;
use warp::{Filter, Rejection, Reply};

use crate::error::HttpError;
use crate::state::telemetry::TelemetryState;

pub const DEFAULT_PORT: u16 = 8080;
pub const LIVENESS_MESSAGE: &str = "ESP32 Bridge Server is running";

/// `GET /` answers with a fixed liveness message, `GET /status` with the current telemetry as
/// JSON. Everything else gets warp's default rejection.
pub fn routes(state: TelemetryState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let root = warp::path::end().map(|| LIVENESS_MESSAGE);
    let status = warp::path!("status").map(move || warp::reply::json(&state.document()));

    warp::get().and(root.or(status))
}

pub struct StatusHttpListener {
    state: TelemetryState,
    address: SocketAddr,
}

impl StatusHttpListener {
    pub fn new(state: TelemetryState, address: SocketAddr) -> Self {
        StatusHttpListener { state, address }
    }

    /// Binds the socket and returns the bound address plus the future serving requests. The
    /// future never completes.
    pub fn bind(self) -> Result<(SocketAddr, impl Future<Output = ()>), HttpError> {
        let (bound, server) = warp::serve(routes(self.state)).try_bind_ephemeral(self.address)?;
        info!("Status server listening on http://{}", bound);
        Ok((bound, server))
    }
}
