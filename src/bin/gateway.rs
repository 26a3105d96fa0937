//! Gateway Application
//!
//! Wires the firmware core together: storage, audio engine, command bus
//! with its handler table, stream ingress and the task roster.

use anyhow::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartalarm_gateway::{
    audio::{AudioEngine, CpalOutput, JitterBuffer},
    bus::{BusClient, Dispatcher},
    config::GatewayConfig,
    net::StreamIngress,
    sensor::SensorTopics,
    storage::{DirStorage, Storage},
    tasks,
    transfer::{TransferTopics, UploadReceiver},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Smart Alarm Gateway");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref())?;

    // Storage first: declining to start beats running without a store
    let storage = Arc::new(DirStorage::new(
        &config.upload.dir,
        config.upload.quota_bytes,
        config.upload.flush_interval_bytes,
    )?);
    tracing::info!("Stored audio files: [{}]", storage.list_audio_files());

    // Output device binds at the file-playback rate up front
    let output = CpalOutput::new(config.audio.output_device.clone(), config.audio.volume)?;

    let jitter = Arc::new(JitterBuffer::new(
        config.stream.buffer_capacity,
        config.stream.preroll_percent,
        config.stream.max_packet_size,
    ));

    let engine = Arc::new(Mutex::new(AudioEngine::new(
        Box::new(output),
        jitter.clone(),
        storage.clone(),
        config.audio.volume,
    )));

    let upload = Arc::new(Mutex::new(UploadReceiver::new(
        storage.clone(),
        TransferTopics {
            response: config.topics.upload_response.clone(),
            ack: config.topics.upload_ack.clone(),
            status: config.topics.upload_status.clone(),
        },
        Duration::from_secs(config.upload.timeout_secs),
    )));

    let mut dispatcher = Dispatcher::new();

    // Upload handlers run first so bulk traffic never waits behind commands
    {
        let upload = upload.clone();
        dispatcher.register_handler(
            config.topics.upload_request.clone(),
            200,
            "UploadControl",
            Box::new(move |bus, _topic, payload| upload.lock().handle_request(bus, payload)),
        );
    }
    {
        let upload = upload.clone();
        dispatcher.register_handler(
            config.topics.upload_chunk.clone(),
            200,
            "UploadChunks",
            Box::new(move |bus, _topic, payload| upload.lock().handle_chunk(bus, payload)),
        );
    }

    {
        let engine = engine.clone();
        let audio_status = config.topics.audio_status.clone();
        dispatcher.register_handler(
            config.topics.play_audio.clone(),
            150,
            "AudioPlayback",
            Box::new(move |bus, _topic, payload| {
                let filename = String::from_utf8_lossy(payload).trim().to_string();
                let started = engine.lock().play_file(&filename);
                bus.publish(&audio_status, if started { "playing" } else { "error" });
                true
            }),
        );
    }

    {
        let engine = engine.clone();
        let topics = config.topics.clone();
        dispatcher.register_handler(
            config.topics.commands.clone(),
            100,
            "SystemCommands",
            Box::new(move |bus, _topic, payload| {
                let message = String::from_utf8_lossy(payload).to_lowercase();
                let message = message.trim();

                if message == "stop_audio" {
                    engine.lock().stop();
                    bus.publish(&topics.status, "audio_stopped");
                    true
                } else if message == "list_files" {
                    let list = engine.lock().list_files();
                    if list.is_empty() {
                        bus.publish(&topics.status, "no_files");
                    } else {
                        bus.publish(&topics.files, list);
                        bus.publish(&topics.status, "files_listed");
                    }
                    true
                } else if let Some(value) = message.strip_prefix("volume=") {
                    let mut engine = engine.lock();
                    engine.set_volume(value.parse::<f32>().unwrap_or(0.0));
                    bus.publish(&topics.status, format!("volume:{:.2}", engine.volume()));
                    true
                } else if let Some(filename) = message.strip_prefix("play:") {
                    let started = engine.lock().play_file(filename);
                    bus.publish(&topics.status, if started { "playing" } else { "error" });
                    true
                } else if message == "status" {
                    let engine = engine.lock();
                    let audio = if engine.playing() { "playing" } else { "stopped" };
                    bus.publish(
                        &topics.status,
                        format!("online|audio:{}|volume:{:.2}", audio, engine.volume()),
                    );
                    true
                } else {
                    false
                }
            }),
        );
    }

    let (bus_client, bus) = BusClient::new(&config.broker, dispatcher);
    tokio::spawn(bus_client.run());

    let ingress = StreamIngress::bind(&config.stream, engine.clone(), jitter.clone())?;
    tokio::spawn(ingress.run());

    // Sensor relay boundary: raw 38-byte records arrive as datagrams and are
    // queued to the forwarder; pairing/capture live on the relay nodes
    let sensor_addr = format!("{}:{}", config.sensor.bind_address, config.sensor.port);
    let sensor_socket = tokio::net::UdpSocket::bind(&sensor_addr).await?;
    tracing::info!("Sensor relay ingress on {}", sensor_addr);

    let (record_tx, record_rx) = tokio::sync::mpsc::channel::<bytes::Bytes>(32);
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            match sensor_socket.recv_from(&mut buf).await {
                Ok((len, _peer)) => {
                    let _ = record_tx.send(bytes::Bytes::copy_from_slice(&buf[..len])).await;
                }
                Err(e) => tracing::warn!("Sensor socket error: {}", e),
            }
        }
    });

    tasks::spawn_sensor_forwarder(
        record_rx,
        bus.clone(),
        SensorTopics::from_prefix(&config.topics.sensor_prefix),
        upload.clone(),
    );
    tasks::spawn_upload_watchdog(upload.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    let audio_thread = tasks::spawn_audio_pump(
        engine.clone(),
        bus.clone(),
        config.topics.audio_status.clone(),
        shutdown.clone(),
    )?;

    for task in tasks::ROSTER {
        tracing::info!(
            "Task '{}' (priority {}, period {:?})",
            task.name,
            task.priority,
            task.period
        );
    }
    tracing::info!("Gateway running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    shutdown.store(true, Ordering::Relaxed);
    engine.lock().stop();
    let _ = audio_thread.join();

    Ok(())
}
