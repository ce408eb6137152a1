//! Child-process supervision and the keyed server registry.
//!
//! Every spawned package runner is one `ManagedServer`: a pipe-connected
//! child whose stdout is decoded by the frame parser and fanned out to all
//! subscribers over a broadcast bus. The registry holds a record exactly as
//! long as the child is alive; every terminal path (exit, kill, reap,
//! shutdown) converges on the monitor task, which removes the record once.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use hatchway_core::{CommandSpec, Ecosystem, GatewayError, find_in_path};
use hatchway_mcp::{FrameParser, encode_frame};

const EVENT_BUS_CAPACITY: usize = 256;
const STDOUT_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
    Errored,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub max_servers: usize,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            max_servers: 10,
            idle_timeout: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// One live child process plus its fanout state.
#[derive(Debug)]
pub struct ManagedServer {
    pub id: String,
    pub package: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    status: Mutex<ServerStatus>,
    last_activity: Mutex<DateTime<Utc>>,
    subscribers: Mutex<HashSet<String>>,
    /// Taken (and dropped) on child exit so every receiver observes closure.
    events: Mutex<Option<broadcast::Sender<Value>>>,
    stdin: tokio::sync::Mutex<Option<tokio::process::ChildStdin>>,
    kill: Notify,
}

impl ManagedServer {
    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn status(&self) -> ServerStatus {
        *self.status.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }
}

/// Registry snapshot entry for `GET /servers`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStat {
    pub id: String,
    pub pkg: String,
    pub uptime: i64,
    pub subscribers: usize,
    pub last_activity_at: DateTime<Utc>,
}

pub struct Supervisor {
    servers: RwLock<HashMap<String, Arc<ManagedServer>>>,
    opts: SupervisorOptions,
}

impl Supervisor {
    pub fn new(opts: SupervisorOptions) -> Arc<Self> {
        Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
            opts,
        })
    }

    /// Return the live child for `server_id`, spawning it if absent.
    ///
    /// The whole slow path runs inside the registry write lock (process
    /// creation is synchronous), so concurrent callers with the same key get
    /// exactly one spawn. The child counts as running as soon as its record
    /// exists; readiness is not probed further.
    pub fn get_or_create(
        self: &Arc<Self>,
        server_id: &str,
        package: &str,
        ecosystem: Ecosystem,
        spec: &CommandSpec,
        env: &[(String, String)],
    ) -> Result<Arc<ManagedServer>, GatewayError> {
        if let Some(server) = self.servers.read().get(server_id) {
            server.touch();
            return Ok(server.clone());
        }

        let mut servers = self.servers.write();
        if let Some(server) = servers.get(server_id) {
            server.touch();
            return Ok(server.clone());
        }

        if servers.len() >= self.opts.max_servers {
            return Err(GatewayError::MaxProcessesExceeded(self.opts.max_servers));
        }

        let Some(runner) = find_in_path(&spec.command) else {
            return Err(GatewayError::RuntimeNotAvailable {
                command: spec.command.clone(),
                ecosystem,
            });
        };

        let mut child = Command::new(&runner)
            .args(&spec.args)
            .envs(env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::ServerStartFailed(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let server = Arc::new(ManagedServer {
            id: server_id.to_string(),
            package: package.to_string(),
            pid: child.id(),
            started_at: Utc::now(),
            status: Mutex::new(ServerStatus::Running),
            last_activity: Mutex::new(Utc::now()),
            subscribers: Mutex::new(HashSet::new()),
            events: Mutex::new(Some(events_tx)),
            stdin: tokio::sync::Mutex::new(stdin),
            kill: Notify::new(),
        });
        servers.insert(server_id.to_string(), server.clone());
        drop(servers);

        info!(
            server_id = %server_id,
            package = %package,
            pid = ?server.pid,
            command = %runner.display(),
            "spawned package server"
        );

        if let Some(stdout) = stdout {
            let server = server.clone();
            tokio::spawn(async move {
                let mut stdout = stdout;
                let mut parser = FrameParser::new();
                let mut buf = [0u8; STDOUT_CHUNK];
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            for message in parser.push(&buf[..n]) {
                                server.touch();
                                let tx = server.events.lock().clone();
                                if let Some(tx) = tx {
                                    // No receivers is fine; fanout resumes on
                                    // the next subscribe.
                                    let _ = tx.send(message);
                                }
                            }
                        }
                    }
                }
            });
        }

        if let Some(stderr) = stderr {
            let server_id = server.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server_id = %server_id, line = %line, "child stderr");
                }
            });
        }

        // Monitor: the only place a record is removed from the registry.
        {
            let supervisor = Arc::clone(self);
            let server = server.clone();
            tokio::spawn(async move {
                let exit = tokio::select! {
                    status = child.wait() => status.ok(),
                    _ = server.kill.notified() => {
                        let _ = child.start_kill();
                        child.wait().await.ok()
                    }
                };

                let terminal = match exit {
                    Some(status) if status.success() => ServerStatus::Stopped,
                    Some(_) => ServerStatus::Errored,
                    None => ServerStatus::Errored,
                };
                *server.status.lock() = terminal;
                *server.events.lock() = None;
                server.stdin.lock().await.take();

                // Remove only our own record: the key may already belong to a
                // replacement child spawned after this one exited.
                {
                    let mut servers = supervisor.servers.write();
                    let is_ours = servers
                        .get(&server.id)
                        .is_some_and(|current| Arc::ptr_eq(current, &server));
                    if is_ours {
                        servers.remove(&server.id);
                    }
                }

                info!(
                    server_id = %server.id,
                    package = %server.package,
                    exit = ?exit,
                    "package server exited"
                );
            });
        }

        Ok(server)
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<ManagedServer>> {
        self.servers.read().get(server_id).cloned()
    }

    /// Frame `payload` and write it to the child's stdin.
    pub async fn send(&self, server_id: &str, payload: &Value) -> Result<(), GatewayError> {
        let server = self
            .get(server_id)
            .ok_or_else(|| GatewayError::PackageNotFound(server_id.to_string()))?;

        let frame = encode_frame(payload)
            .map_err(|e| GatewayError::Internal(format!("encode frame: {e}")))?;

        let mut guard = server.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(GatewayError::PackageNotFound(server_id.to_string()));
        };
        stdin
            .write_all(&frame)
            .await
            .map_err(|e| GatewayError::Internal(format!("child stdin write: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| GatewayError::Internal(format!("child stdin flush: {e}")))?;
        drop(guard);

        server.touch();
        Ok(())
    }

    /// Register a subscriber and hand back its end of the event bus.
    /// Registration is idempotent per id.
    pub fn subscribe(
        &self,
        server_id: &str,
        subscriber_id: &str,
    ) -> Result<broadcast::Receiver<Value>, GatewayError> {
        let server = self
            .get(server_id)
            .ok_or_else(|| GatewayError::PackageNotFound(server_id.to_string()))?;

        let events = server.events.lock();
        let Some(tx) = events.as_ref() else {
            return Err(GatewayError::PackageNotFound(server_id.to_string()));
        };
        let rx = tx.subscribe();
        drop(events);

        server
            .subscribers
            .lock()
            .insert(subscriber_id.to_string());
        server.touch();
        debug!(server_id = %server_id, subscriber_id = %subscriber_id, "subscriber attached");
        Ok(rx)
    }

    pub fn unsubscribe(&self, server_id: &str, subscriber_id: &str) {
        if let Some(server) = self.get(server_id) {
            server.subscribers.lock().remove(subscriber_id);
            server.touch();
            debug!(server_id = %server_id, subscriber_id = %subscriber_id, "subscriber detached");
        }
    }

    pub fn stats(&self) -> Vec<ServerStat> {
        let now = Utc::now();
        self.servers
            .read()
            .values()
            .map(|s| ServerStat {
                id: s.id.clone(),
                pkg: s.package.clone(),
                uptime: (now - s.started_at).num_seconds(),
                subscribers: s.subscriber_count(),
                last_activity_at: s.last_activity(),
            })
            .collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.read().len()
    }

    /// Kick off the periodic idle reaper.
    pub fn start_reaper(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.opts.reap_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                supervisor.reap_idle();
            }
        });
    }

    /// Kill every child with no subscribers that has been idle past the
    /// threshold. Removal happens in the monitor task.
    pub fn reap_idle(&self) {
        let idle_for = match chrono::Duration::from_std(self.opts.idle_timeout) {
            Ok(d) => d,
            Err(_) => return,
        };
        let now = Utc::now();
        let victims: Vec<Arc<ManagedServer>> = self
            .servers
            .read()
            .values()
            .filter(|s| s.subscriber_count() == 0 && now - s.last_activity() > idle_for)
            .cloned()
            .collect();

        for server in victims {
            warn!(server_id = %server.id, package = %server.package, "reaping idle server");
            server.kill.notify_one();
        }
    }

    /// Signal every child to terminate and empty the registry.
    pub fn shutdown(&self) {
        let all: Vec<Arc<ManagedServer>> = self.servers.read().values().cloned().collect();
        info!(count = all.len(), "shutting down all package servers");
        for server in all {
            server.kill.notify_one();
        }
    }
}
