use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use glam::{Mat4, Vec3};
use log::info;
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::time::{Duration, Instant};

use voxstream::{
    client::{ChunkRequester, ClientMeshPipeline, ClientTerrainController, CubeMesher, MeshStore},
    config::core::{default_config_path, EngineConfig},
    net::{BlockChange, ChunkData, TerrainPacket},
    server::{PlayerId, ServerTerrainController, TerrainEventSink},
    world::{generator, BlockRegistry, ChunkCoord},
};

const PLAYER: PlayerId = 1;

/// Server side of an in-process connection: packets are encoded and queued
/// for the client loop.
struct Outbox {
    tx: Sender<Vec<u8>>,
}

impl Outbox {
    fn push(&self, packet: TerrainPacket) {
        match packet.encode() {
            Ok(bytes) => {
                if self.tx.send(bytes).is_err() {
                    log::warn!("Client link closed, dropping packet");
                }
            }
            Err(e) => log::error!("Failed to encode packet: {}", e),
        }
    }
}

impl TerrainEventSink for Outbox {
    fn send_chunk(&self, _player: PlayerId, data: ChunkData) {
        self.push(TerrainPacket::ChunkData(data));
    }

    fn send_block_change(&self, _player: PlayerId, change: BlockChange) {
        self.push(TerrainPacket::block_change(change));
    }
}

struct Uplink {
    server: Arc<ServerTerrainController>,
}

impl ChunkRequester for Uplink {
    fn request_chunk(&self, coord: ChunkCoord) {
        self.server.request_chunk(PLAYER, coord);
    }
}

fn drain(inbox: &Receiver<Vec<u8>>, client: &ClientTerrainController) -> Result<usize> {
    let mut packets = 0;
    for bytes in inbox.try_iter() {
        let packet = TerrainPacket::decode(&bytes).context("Malformed packet from server")?;
        client.on_packet(packet)?;
        packets += 1;
    }
    Ok(packets)
}

fn main() -> Result<()> {
    let config_path = default_config_path()?;
    let config = EngineConfig::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    SimpleLogger::new()
        .with_level(config.log_level())
        .init()
        .context("Failed to initialize logger")?;
    info!("Using config at {}", config_path.display());

    let registry = Arc::new(BlockRegistry::with_defaults());
    let (tx, inbox) = unbounded();
    let server = Arc::new(
        ServerTerrainController::with_region_storage(
            config.chunks.clone(),
            registry.clone(),
            generator::from_config(&config.worldgen),
        )
        .with_event_sink(Arc::new(Outbox { tx })),
    );

    let mut position = Vec3::new(8.0, 8.0, config.chunks.z_size as f32 * 0.75);
    server.add_player(PLAYER, position, config.chunks.view_radius);
    let server_thread = server.spawn().context("Failed to start terrain thread")?;

    let client = ClientTerrainController::new(
        config.chunks.clone(),
        registry.clone(),
        Arc::new(Uplink {
            server: server.clone(),
        }),
    );
    let meshes = Arc::new(MeshStore::new());
    let pipeline = Arc::new(ClientMeshPipeline::new(
        config.render.clone(),
        config.chunks.view_radius,
        client.store().clone(),
        Arc::new(CubeMesher::new(registry.clone())),
        meshes.clone(),
    ));
    let client = client.with_listener(pipeline.clone());
    pipeline.start().context("Failed to start mesh workers")?;

    let aspect = 16.0 / 9.0;
    let projection = Mat4::perspective_rh(
        config.render.fov.to_radians(),
        aspect,
        config.render.near,
        config.render.far,
    );
    let started = Instant::now();
    let mut frame = 0u64;
    while started.elapsed() < Duration::from_secs(10) {
        position.x += 0.5;
        server.move_player(PLAYER, position);
        client.update_window(position);
        drain(&inbox, &client)?;

        let view = Mat4::look_at_rh(position, position + Vec3::X, Vec3::Z);
        pipeline.set_camera(position, projection * view);
        if frame % 60 == 0 {
            info!(
                "frame {}: {} columns, {} visible sections, {} meshes, {} to draw",
                frame,
                client.store().len(),
                pipeline.visible_count(),
                meshes.len(),
                pipeline.draw_list().len()
            );
        }
        frame += 1;
        std::thread::sleep(Duration::from_millis(16));
    }

    pipeline.stop();
    server.remove_player(PLAYER);
    server.shutdown().context("Failed to save world")?;
    if server_thread.join().is_err() {
        log::error!("Terrain thread panicked");
    }
    info!("Done after {} frames", frame);
    Ok(())
}
