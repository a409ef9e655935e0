//! Headless runtime wiring (§6): assembles every component described in §3
//! into one [`Components`] bundle and drives the heartbeat tick / HITL
//! evaluation loop for the standalone daemon process.
//!
//! This is the non-Tauri sibling of the old `tauri::Builder` bootstrap: the
//! same components, wired by hand instead of through IPC commands, driven by
//! a plain `tokio::time::interval` instead of a window event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::action_queue::{ActionQueue, ActionStatus, JsonActionQueue};
use crate::agent::{ReasoningLoop, SessionRouter};
use crate::agents::Orchestrator;
use crate::ai::provider::LLMProvider;
use crate::ai::providers::{OpenAICompatibleConfig, OpenAICompatibleProvider};
use crate::config::ConfigStore;
use crate::config::schema::AppConfig;
use crate::event_bus::{EventBus, EventFilter, EventType, TokioBroadcastBus};
use crate::guard::Guard;
use crate::hitl::HitlProxy;
use crate::identity::IdentityLoader;
use crate::memory::{
    HygieneConfig, LruEmbeddingCache, Memory, MemoryForgetTool, MemoryHygiene, MemoryRecallTool,
    MemoryStoreTool, MockEmbeddingProvider, InMemoryStore,
};
use crate::message_bus::MessageBus;
use crate::scheduler::AgentTick;
use crate::security::policy::{AutonomyLevel, SecurityPolicy};
use crate::skill_registry::{SkillsRegistry, resolve_declarative_dir, resolve_plugins_dir};
use crate::tools::{
    FileListTool, FileReadTool, FileWriteTool, PatchTool, ProcessTool, SessionSpawnTool, ShellTool,
};

const KEYRING_SERVICE: &str = "com.sprklai.mesoclaw";

/// Every live component the daemon needs, wired together once at startup and
/// shared (by `Arc`) between the gateway, the tick loop, and the HITL loop.
#[derive(Clone)]
pub struct Components {
    pub bus: Arc<dyn EventBus>,
    pub config: Arc<ConfigStore>,
    pub queue: Arc<dyn ActionQueue>,
    pub memory: Arc<dyn Memory>,
    pub skills: Arc<SkillsRegistry>,
    pub guard: Arc<Guard>,
    pub identity: Arc<IdentityLoader>,
    pub provider: Arc<dyn LLMProvider>,
    pub message_bus: Arc<MessageBus>,
    pub reasoning_loop: Arc<ReasoningLoop>,
    pub agent_tick: Arc<AgentTick>,
    pub hitl: Arc<HitlProxy>,
    pub orchestrator: Arc<Orchestrator>,
    pub loop_running: Arc<AtomicBool>,
}

fn home_dir() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".mesoclaw"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

fn autonomy_level_from_str(s: &str) -> AutonomyLevel {
    match s {
        "readonly" | "read_only" => AutonomyLevel::ReadOnly,
        "supervised" => AutonomyLevel::Supervised,
        _ => AutonomyLevel::Full,
    }
}

/// Look up the API key for `provider_id` in the OS keyring, mirroring the
/// `config set-key` / `get-key` convention in the CLI.
fn provider_api_key(provider_id: &str) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("api-key:{provider_id}")).ok()?;
    entry.get_password().ok()
}

/// Build an [`OpenAICompatibleProvider`] from the configured provider id,
/// falling back to Ollama (no key required) if no key is present for a
/// provider that needs one.
fn build_provider(cfg: &AppConfig) -> Result<OpenAICompatibleProvider, String> {
    let provider_id = cfg.provider.default_id.as_str();
    let key = provider_api_key(provider_id);

    let base = match (provider_id, key) {
        ("openai", Some(k)) => OpenAICompatibleConfig::openai(k),
        ("anthropic", Some(k)) => OpenAICompatibleConfig::anthropic(k),
        ("gemini", Some(k)) => OpenAICompatibleConfig::gemini(k),
        ("openrouter", Some(k)) => OpenAICompatibleConfig::openrouter(k),
        ("vercel_gateway" | "vercel-gateway", Some(k)) => OpenAICompatibleConfig::vercel_gateway(k),
        ("ollama", _) => OpenAICompatibleConfig::ollama(),
        (other, None) => {
            tracing::warn!(
                provider = other,
                "no API key found in keyring for configured provider, falling back to ollama"
            );
            OpenAICompatibleConfig::ollama()
        }
        (other, Some(k)) => {
            tracing::warn!(provider = other, "unrecognised provider id, treating as OpenAI-compatible");
            OpenAICompatibleConfig::new(k, "https://api.openai.com/v1")
        }
    };

    let configured = base
        .default_model(cfg.provider.default_model.clone())
        .timeout(Duration::from_secs(cfg.provider.request_timeout_secs))
        .max_retries(cfg.provider.max_retries);

    OpenAICompatibleProvider::new(configured, provider_id.to_string())
}

/// Wire every component in dependency order. Does not start any background
/// task or bind any socket — that is [`run_foreground`]'s job.
pub async fn build(config_path: Option<PathBuf>) -> Result<Components, String> {
    let home = home_dir()?;
    std::fs::create_dir_all(&home).map_err(|e| format!("failed to create {home:?}: {e}"))?;

    let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());

    let config = Arc::new(ConfigStore::load(config_path, Some(bus.clone())).map_err(|e| e.to_string())?);
    let cfg = config.snapshot().await;

    let queue: Arc<dyn ActionQueue> = Arc::new(
        JsonActionQueue::new(
            home.join("queue.json"),
            cfg.action_queue.retention_count,
            Some(bus.clone()),
        )
        .map_err(|e| e.to_string())?,
    );

    let embedding = Box::new(MockEmbeddingProvider::new());
    let cached = LruEmbeddingCache::new(embedding, cfg.memory.embedding_cache_size);
    let memory: Arc<dyn Memory> = Arc::new(
        InMemoryStore::new_with_path(Arc::new(cached), home.join("memory.json"))
            .map_err(|e| e.to_string())?,
    );

    let skills = Arc::new(SkillsRegistry::new(
        cfg.skills.clone(),
        Some(queue.clone()),
        Some(bus.clone()),
    ));

    let mut policy = SecurityPolicy::default_policy();
    policy.autonomy_level = autonomy_level_from_str(&cfg.security.autonomy_level);
    policy.workspace_root = cfg.security.workspace_root.clone().map(PathBuf::from);
    let policy = Arc::new(policy);

    skills.register(Arc::new(ShellTool::new(policy.clone())));
    skills.register(Arc::new(FileReadTool::new(policy.clone())));
    skills.register(Arc::new(FileWriteTool::new(policy.clone())));
    skills.register(Arc::new(FileListTool::new(policy.clone())));
    skills.register(Arc::new(PatchTool::new(policy.clone())));
    skills.register(Arc::new(ProcessTool::new(policy.clone())));
    skills.register(Arc::new(SessionSpawnTool::new(
        policy.clone(),
        Arc::new(SessionRouter::new()),
    )));
    skills.register(Arc::new(MemoryStoreTool::new(memory.clone())));
    skills.register(Arc::new(MemoryRecallTool::new(memory.clone())));
    skills.register(Arc::new(MemoryForgetTool::new(memory.clone())));

    let identity_dir = cfg
        .identity
        .dir
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join("identity"));
    let identity = IdentityLoader::new_with_bus(identity_dir, bus.clone())?;

    let provider: Arc<dyn LLMProvider> = Arc::new(build_provider(&cfg)?);

    let message_bus = Arc::new(MessageBus::new(
        memory.clone(),
        queue.clone(),
        Some(bus.clone()),
        cfg.message_bus.clone(),
    ));

    let guard = Arc::new(Guard::new(cfg.guard.clone()));

    let reasoning_loop = Arc::new(ReasoningLoop::new(
        queue.clone(),
        memory.clone(),
        guard.clone(),
        skills.clone(),
        provider.clone(),
        Some(bus.clone()),
        cfg.action_queue.clone(),
        cfg.provider.default_model.clone(),
    ));

    let plugins_dir = resolve_plugins_dir(&cfg.skills, &home);
    let declarative_dir = resolve_declarative_dir(&cfg.skills, &home);

    let agent_tick = Arc::new(AgentTick::new(
        queue.clone(),
        memory.clone(),
        skills.clone(),
        reasoning_loop.clone(),
        provider.clone(),
        Some(bus.clone()),
        cfg.action_queue.clone(),
        cfg.skills.clone(),
        plugins_dir,
        declarative_dir,
        cfg.provider.default_model.clone(),
    ));

    let hitl = Arc::new(HitlProxy::new(
        queue.clone(),
        memory.clone(),
        guard.clone(),
        identity.clone(),
        provider.clone(),
        Some(bus.clone()),
        cfg.hitl.clone(),
        cfg.provider.default_model.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(queue.clone(), Some(bus.clone())));

    Ok(Components {
        bus,
        config,
        queue,
        memory,
        skills,
        guard,
        identity,
        provider,
        message_bus,
        reasoning_loop,
        agent_tick,
        hitl,
        orchestrator,
        loop_running: Arc::new(AtomicBool::new(true)),
    })
}

/// Forward [`crate::event_bus::AppEvent::UserActivity`] events onto the HITL
/// proxy's activity tracker, so a genuine human reply suppresses a pending
/// synthetic intervention (§4.8 abort condition b).
fn spawn_activity_forwarder(bus: Arc<dyn EventBus>, hitl: Arc<HitlProxy>) {
    let mut rx = bus.subscribe_filtered(EventFilter::new(vec![EventType::UserActivity]));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(crate::event_bus::AppEvent::UserActivity { source, source_id }) => {
                    hitl.record_activity(&source, &source_id);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("activity forwarder lagged, missed {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Drive the heartbeat tick, config reload, HITL evaluation, and memory
/// hygiene sweep on a fixed cadence (§4.7). Runs until `loop_running` is
/// permanently torn down (it is never cleared by this loop itself — only
/// the gateway's `/api/v1/loop/stop` route pauses reasoning-loop work while
/// leaving the tick cadence itself running so config reload / hygiene keep
/// functioning).
async fn drive_ticks(c: Components) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last_heartbeat = chrono::Utc::now();
    let mut waiting_seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    loop {
        interval.tick().await;

        if let Err(e) = c.config.reload_if_changed().await {
            tracing::warn!("config reload failed: {e}");
        }
        let cfg = c.config.snapshot().await;

        let heartbeat_due = cfg.scheduler.heartbeat_enabled
            && crate::scheduler::agent_tick::heartbeat_due(
                last_heartbeat,
                cfg.scheduler.heartbeat_interval_secs,
            );
        if heartbeat_due {
            last_heartbeat = chrono::Utc::now();
        }

        if c.loop_running.load(Ordering::Relaxed) {
            c.agent_tick.tick(heartbeat_due).await;
        }

        drive_hitl(&c, &mut waiting_seen).await;

        if heartbeat_due {
            let hygiene = MemoryHygiene::new(
                home_dir().unwrap_or_else(|_| PathBuf::from(".mesoclaw")).join("memory"),
                HygieneConfig::default(),
            );
            let report = hygiene.run();
            if !report.errors.is_empty() {
                tracing::warn!(errors = ?report.errors, "memory hygiene sweep reported errors");
            }
        }
    }
}

/// One HITL pass per tick: mark newly-waiting actions, run any stuck check
/// on in-progress actions, and evaluate whatever is due (§4.8).
async fn drive_hitl(c: &Components, waiting_seen: &mut std::collections::HashSet<String>) {
    let actions = c.queue.get_queue().await;

    for action in &actions {
        match action.status {
            ActionStatus::Waiting => {
                if waiting_seen.insert(action.id.clone()) {
                    c.hitl.on_waiting(&action.id);
                }
            }
            ActionStatus::InProgress => {
                waiting_seen.remove(&action.id);
                match c.hitl.check_stuck(action).await {
                    Ok(signals) if !signals.is_empty() => {
                        tracing::debug!(action_id = %action.id, ?signals, "hitl stuck check fired");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(action_id = %action.id, "hitl stuck check failed: {e}"),
                }
            }
            _ => {
                waiting_seen.remove(&action.id);
            }
        }
    }

    for action_id in c.hitl.due_evaluations() {
        match c.hitl.evaluate(&action_id).await {
            Ok(outcome) => tracing::debug!(action_id = %action_id, ?outcome, "hitl evaluation"),
            Err(e) => tracing::warn!(action_id = %action_id, "hitl evaluation failed: {e}"),
        }
    }
}

/// Build every component, start the tick/HITL driver and the activity
/// forwarder, then (if the `gateway` feature is enabled) bind and serve the
/// HTTP + WebSocket gateway in the foreground. Without the `gateway` feature,
/// blocks on Ctrl-C / SIGTERM instead.
pub async fn run_foreground(config_path: Option<PathBuf>) -> Result<(), String> {
    let components = build(config_path).await?;
    spawn_activity_forwarder(components.bus.clone(), components.hitl.clone());

    let loop_running = components.loop_running.clone();
    let driver = tokio::spawn(drive_ticks(components.clone()));

    #[cfg(feature = "gateway")]
    {
        let state = crate::gateway::GatewayState {
            bus: components.bus.clone(),
            queue: components.queue.clone(),
            memory: components.memory.clone(),
            skills: components.skills.clone(),
            config: components.config.clone(),
            message_bus: components.message_bus.clone(),
            loop_running: loop_running.clone(),
        };
        let result = crate::gateway::start_gateway(state).await;
        driver.abort();
        return result;
    }

    #[cfg(not(feature = "gateway"))]
    {
        wait_for_shutdown_signal().await;
        loop_running.store(false, Ordering::Relaxed);
        driver.abort();
        Ok(())
    }
}

#[cfg(not(feature = "gateway"))]
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
