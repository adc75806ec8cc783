//! Daemon wiring: sidecar process, connection supervisor, inbound router and
//! the single request dispatcher.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    murmur_agents::ClaudeCli,
    murmur_auto_reply::{Dispatcher, EgressGate, InboundRouter, Responder},
    murmur_channels::AccessGate,
    murmur_config::{MurmurConfig, Severity},
    murmur_media::MediaPipeline,
    murmur_sessions::HistoryStore,
    murmur_voice::{ElevenLabsTts, Ffmpeg, Transcoder, TtsVoiceNotes, VoiceNoteSynth, WhisperCli},
    murmur_whatsapp::{
        SharedSidecar, SidecarConfig, SidecarProcess, Supervisor, SupervisorConfig,
        WhatsAppOutbound, find_sidecar_dir, start_sidecar,
    },
    tokio::sync::{Mutex, mpsc},
    tracing::{error, info, warn},
};

/// Events buffered between the transport and the router.
const INBOUND_CAPACITY: usize = 256;

/// Run until interrupted or until a fatal error.
pub async fn run(config: MurmurConfig) -> Result<()> {
    check_config(&config)?;
    for dir in config.runtime_dirs() {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let sidecar: Option<SharedSidecar> = if config.whatsapp.auto_start {
        Some(Arc::new(Mutex::new(spawn_sidecar(&config).await?)))
    } else {
        info!(port = config.whatsapp.port, "expecting an externally managed sidecar");
        None
    };

    let result = tokio::select! {
        result = serve(&config, sidecar.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        },
    };

    if let Some(process) = &sidecar
        && let Err(e) = process.lock().await.stop().await
    {
        warn!(error = %e, "failed to stop sidecar");
    }
    result
}

/// Log every diagnostic; refuse to start on errors.
fn check_config(config: &MurmurConfig) -> Result<()> {
    let result = murmur_config::validate(config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, category = d.category, "{}", d.message),
            Severity::Info => info!(path = %d.path, category = d.category, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!(
            "configuration has {} error(s); run `murmur doctor` for details",
            result.count(Severity::Error)
        );
    }
    Ok(())
}

async fn spawn_sidecar(config: &MurmurConfig) -> Result<SidecarProcess> {
    let sidecar_dir = find_sidecar_dir(config.whatsapp.sidecar_dir.as_deref())?;
    let process = start_sidecar(SidecarConfig {
        sidecar_dir,
        port: config.whatsapp.port,
        auth_dir: Some(config.auth_dir()),
        ..Default::default()
    })
    .await?;
    Ok(process)
}

async fn serve(config: &MurmurConfig, sidecar: Option<SharedSidecar>) -> Result<()> {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

    let mut supervisor_config = SupervisorConfig::new(config.whatsapp.port, config.auth_dir());
    supervisor_config.reconnect_delay = Duration::from_millis(config.whatsapp.reconnect_delay_ms);
    supervisor_config.max_reconnect_attempts = config.whatsapp.max_reconnect_attempts;
    let mut supervisor = Supervisor::new(supervisor_config, inbound_tx);
    if let Some(sidecar) = sidecar {
        supervisor = supervisor.with_sidecar(sidecar);
    }
    let outbound = Arc::new(WhatsAppOutbound::new(supervisor.slot()));

    let transcoder: Arc<dyn Transcoder> =
        Arc::new(Ffmpeg::new(config.voice.ffmpeg_path.as_deref()));
    let stt = Arc::new(WhisperCli::new(
        config.voice.whisper_path.clone(),
        config.voice.whisper_model.clone(),
    ));
    let media = MediaPipeline::new(
        outbound.clone(),
        stt,
        Arc::clone(&transcoder),
        config.media_tmp_dir(),
    );

    let files_dir =
        std::path::absolute(&config.files_dir).unwrap_or_else(|_| config.files_dir.clone());
    let backend = Arc::new(ClaudeCli::from_config(&config.agent, files_dir.clone()));
    info!(binary = %backend.binary().display(), "agent backend ready");

    let history = Arc::new(HistoryStore::new(
        config.history_dir(),
        config.history.max_entries,
    ));
    let responder = Responder::new(
        outbound.clone(),
        voice_notes(config, transcoder),
        config.voice.reply_mode,
        EgressGate::new([files_dir, config.agent.project_dir.clone()]),
    );
    let (queue, dispatcher) =
        Dispatcher::new(backend, Arc::clone(&history), outbound.clone(), responder).spawn();

    let router = InboundRouter::new(
        AccessGate::new(&config.allowlist, config.self_chat),
        Arc::new(media),
        history,
        outbound,
        queue,
    );
    info!(
        allowlisted = config.allowlist.len(),
        self_chat = config.self_chat,
        voice_reply = %config.voice.reply_mode,
        "murmur ready"
    );

    let supervisor = tokio::spawn(supervisor.run());
    router.run(inbound_rx).await?;
    // The router only stops once the supervisor has dropped its sender.
    supervisor.await??;
    dispatcher.await?;
    Ok(())
}

fn voice_notes(
    config: &MurmurConfig,
    transcoder: Arc<dyn Transcoder>,
) -> Option<Arc<dyn VoiceNoteSynth>> {
    if !config.voice.tts_configured() {
        info!("voice replies disabled: ElevenLabs is not configured");
        return None;
    }
    let tts = ElevenLabsTts::new(
        config.voice.elevenlabs.api_key.clone(),
        config.voice.elevenlabs.voice_id.clone(),
    );
    Some(Arc::new(TtsVoiceNotes::new(
        Arc::new(tts),
        transcoder,
        config.media_tmp_dir(),
    )))
}
