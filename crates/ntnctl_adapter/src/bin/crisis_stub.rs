#![forbid(unsafe_code)]

use std::net::SocketAddr;

use ntnctl_adapter::grpc_api::{
    crisis_service_server::{CrisisService, CrisisServiceServer},
    CrisisRequest, CrisisResponse,
};
use ntnctl_adapter::{init_tracing, stub_crisis_scores, AdapterConfig};
use tonic::{transport::Server, Request, Response, Status};

#[derive(Debug, Default)]
struct StubCrisisService;

#[tonic::async_trait]
impl CrisisService for StubCrisisService {
    async fn evaluate(
        &self,
        request: Request<CrisisRequest>,
    ) -> Result<Response<CrisisResponse>, Status> {
        let req = request.into_inner();
        let crisis_scores = stub_crisis_scores(&req.kpi_sequence, req.seq_len, req.feature_dim)
            .map_err(|reason| {
                tracing::warn!(
                    got = req.kpi_sequence.len(),
                    seq_len = req.seq_len,
                    feature_dim = req.feature_dim,
                    "rejected crisis request"
                );
                Status::invalid_argument(reason)
            })?;
        tracing::debug!(rows = crisis_scores.len(), "scored crisis request");
        Ok(Response::new(CrisisResponse { crisis_scores }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let addr: SocketAddr = AdapterConfig::from_env().grpc_bind.parse()?;
    tracing::info!(%addr, "ntnctl_crisis_stub listening");
    Server::builder()
        .add_service(CrisisServiceServer::new(StubCrisisService))
        .serve(addr)
        .await?;
    Ok(())
}
