//! Synthetic camera session
//!
//! Starts a session against the synthetic camera and the in-memory
//! transport, plays the remote side, and prints bridge statistics.
//!
//! Run with: cargo run --example synthetic_session

use std::sync::Arc;
use std::time::Duration;

use camera_rtc::capture::SyntheticBackend;
use camera_rtc::transport::MemoryTransportFactory;
use camera_rtc::{
    CameraService, IceCandidate, ServiceConfig, SessionDescription, StartSessionRequest,
    TransportState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camera_rtc=debug".parse()?),
        )
        .init();

    let transports = Arc::new(MemoryTransportFactory::new());
    let service = CameraService::new(
        ServiceConfig::default(),
        Arc::new(SyntheticBackend::default()),
        transports.clone(),
    );

    println!("Backend: {}", service.initialize().await?);
    for camera in service.available_cameras().await? {
        println!("  {} ({}), {} formats", camera.id, camera.name, camera.formats.len());
    }

    let session = service
        .start_camera_webrtc_session(StartSessionRequest::new("synthetic-0"))
        .await?;
    println!("Connection {} streaming {}", session.connection_id, session.stream_id);
    println!("Local offer:\n{}", session.description.sdp);

    let id = session.connection_id.clone();
    service
        .add_ice_candidate(&id, IceCandidate::new("candidate:1 1 udp 2122260223 192.0.2.10 54400 typ host"))
        .await?;
    service
        .set_remote_description(&id, SessionDescription::answer("v=0\r\ns=remote\r\n"))
        .await?;

    if let Some(transport) = transports.transport(&id) {
        transport.set_state(TransportState::Connected);
    }

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = service.stats().await;
        for stream in &stats.streams {
            println!(
                "{}: captured={} encoded={} dropped={} ({:.1} fps)",
                stream.stream_id,
                stream.bridge.frames_captured,
                stream.bridge.frames_encoded,
                stream.bridge.frames_dropped,
                stream.encoded_fps(),
            );
        }
    }

    println!("State: {}", service.get_connection_state(&id).await?.state);
    service.close_connection(&id).await?;
    service.shutdown().await;
    println!("Done");

    Ok(())
}
