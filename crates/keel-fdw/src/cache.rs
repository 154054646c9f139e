// SPDX-License-Identifier: Apache-2.0

//! Connection cache and session manager.
//!
//! Remote sessions are expensive to establish and are reused across every
//! scan and modify within one host process. The cache is an explicit,
//! constructor-injected registry — never a process global — keyed by the
//! connection identity. Each entry carries a usage counter that mints the
//! per-statement reference ids, so it only advances when a lookup starts a
//! new logical statement, not on every reattachment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_remote::{RemoteConnector, RemoteSession, SqlStateClass};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{FdwError, Result};
use crate::options::TableOptions;

/// Identity of one cached session: server, database and user. Two
/// requests with an identical key share a session; the key is a plain
/// struct so equality is exact and collisions cannot occur.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub server: String,
    pub database: String,
    pub username: String,
}

impl ConnectionKey {
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            username: username.into(),
        }
    }

    /// The stable connection name, used for statement identifiers and in
    /// the administrative listing.
    pub fn conname(&self) -> String {
        format!("{}{}{}", self.username, self.database, self.server)
    }
}

/// How a session lookup relates to statement identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// The lookup starts a distinguishable remote statement; the usage
    /// counter advances and its new value becomes the reference id.
    NewStatement,
    /// The lookup reattaches to an existing scan; the counter is left
    /// alone.
    Reattach,
}

/// A cached remote session plus its bookkeeping.
pub struct CachedSession {
    session: Box<dyn RemoteSession>,
    key: ConnectionKey,
    /// Display form of the connection target.
    pub dsn_display: String,
    /// Monotonic statement counter; see [`AcquireMode`].
    pub usage: u64,
    /// Current transaction nesting depth; 0 means no open transaction.
    pub tx_depth: u32,
    /// The remote database supports transactions.
    pub tx_enabled: bool,
    /// The remote database runs in ANSI mode.
    pub ansi_mode: bool,
    pub commits: u64,
    pub rollbacks: u64,
}

impl CachedSession {
    pub fn new(session: Box<dyn RemoteSession>, key: ConnectionKey, dsn_display: String) -> Self {
        let caps = session.capabilities();
        Self {
            session,
            key,
            dsn_display,
            usage: 0,
            tx_depth: 0,
            tx_enabled: caps.tx_enabled,
            ansi_mode: caps.ansi_mode,
            commits: 0,
            rollbacks: 0,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn conname(&self) -> String {
        self.key.conname()
    }

    /// The underlying remote session. Callers must have made it current
    /// within the same logical step.
    pub fn session_mut(&mut self) -> &mut dyn RemoteSession {
        self.session.as_mut()
    }
}

impl fmt::Debug for CachedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSession")
            .field("conname", &self.key.conname())
            .field("usage", &self.usage)
            .field("tx_depth", &self.tx_depth)
            .finish()
    }
}

/// Shared handle to one cached session.
pub type SessionHandle = Arc<Mutex<CachedSession>>;

/// Keyed registry of cached sessions.
pub struct ConnectionCache {
    entries: Mutex<HashMap<ConnectionKey, SessionHandle>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `key`, creating the entry with `establish` on a miss.
    ///
    /// Returns the handle and whether it was created. On a hit the usage
    /// counter advances only for [`AcquireMode::NewStatement`]; new
    /// entries always start at usage 1.
    pub fn get_or_create(
        &self,
        key: &ConnectionKey,
        mode: AcquireMode,
        establish: impl FnOnce() -> Result<CachedSession>,
    ) -> Result<(SessionHandle, bool)> {
        let mut entries = self.entries.lock();

        if let Some(handle) = entries.get(key) {
            let mut cached = handle.lock();
            if mode == AcquireMode::NewStatement {
                cached.usage += 1;
            }
            trace!(conname = %key.conname(), usage = cached.usage, "connection cache hit");
            drop(cached);
            return Ok((Arc::clone(handle), false));
        }

        let mut cached = establish()?;
        if cached.key != *key {
            return Err(FdwError::CacheCorruption(format!(
                "established session \"{}\" does not match requested key \"{}\"",
                cached.key.conname(),
                key.conname()
            )));
        }
        cached.usage = 1;

        let handle = Arc::new(Mutex::new(cached));
        entries.insert(key.clone(), Arc::clone(&handle));
        debug!(conname = %key.conname(), "connection cache entry created");
        Ok((handle, true))
    }

    /// Detach the entry unconditionally. The caller is responsible for
    /// closing the underlying session.
    pub fn remove(&self, key: &ConnectionKey) -> Option<SessionHandle> {
        self.entries.lock().remove(key)
    }

    /// Non-mutating lookup.
    pub fn exists(&self, key: &ConnectionKey) -> Option<SessionHandle> {
        self.entries.lock().get(key).map(Arc::clone)
    }

    /// Snapshot of all handles, for iteration outside the cache lock.
    pub fn handles(&self) -> Vec<(ConnectionKey, SessionHandle)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of acquiring a session for a scan or modify.
pub struct AcquiredSession {
    pub handle: SessionHandle,
    /// Whether the session was established by this acquisition.
    pub created: bool,
    /// Usage counter value for this statement; mints the statement,
    /// cursor and descriptor names.
    pub refid: u64,
}

/// Owns the connection cache, the connector and the transaction
/// bookkeeping for all cached sessions.
pub struct SessionManager {
    connector: Box<dyn RemoteConnector>,
    config: ManagerConfig,
    cache: ConnectionCache,
}

impl SessionManager {
    pub fn new(connector: Box<dyn RemoteConnector>, config: ManagerConfig) -> Self {
        Self {
            connector,
            config,
            cache: ConnectionCache::new(),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Get or establish the session for `options`.
    ///
    /// A freshly established session has its connection status checked
    /// immediately, before any other remote call can overwrite the
    /// diagnostic area: warnings are logged, an error removes the cache
    /// entry again so the next use retries with a clean slate.
    pub fn acquire(&self, options: &TableOptions, mode: AcquireMode) -> Result<AcquiredSession> {
        let key = options.connection_key();
        let dsn = options.dsn();

        let (handle, created) = self.cache.get_or_create(&key, mode, || {
            info!(dsn = %dsn.database_string(), "establishing remote session");
            let session = self
                .connector
                .connect(&dsn)
                .map_err(|source| FdwError::Connection {
                    dsn: dsn.database_string(),
                    source,
                })?;
            Ok(CachedSession::new(
                session,
                key.clone(),
                dsn.database_string(),
            ))
        })?;

        if created {
            self.validate_new_session(&key, &handle)?;
        }

        let refid = handle.lock().usage;
        Ok(AcquiredSession {
            handle,
            created,
            refid,
        })
    }

    fn validate_new_session(&self, key: &ConnectionKey, handle: &SessionHandle) -> Result<()> {
        let mut cached = handle.lock();
        let dsn_display = cached.dsn_display.clone();

        match cached.session_mut().connection_status() {
            SqlStateClass::ConnectionOk => Ok(()),
            SqlStateClass::ConnectionWarn => {
                if self.config.log_connection_warnings {
                    for diag in cached.session_mut().drain_warnings() {
                        warn!(dsn = %dsn_display, sqlstate = %diag.sqlstate,
                              "remote connection warning: {}", diag.message);
                    }
                }
                Ok(())
            }
            _ => {
                drop(cached);
                // Force a clean retry on the next use.
                self.cache.remove(key);
                let mut cached = handle.lock();
                let _ = cached.session_mut().disconnect();
                Err(FdwError::Connection {
                    dsn: dsn_display,
                    source: keel_remote::RemoteError::new(
                        "08001",
                        -908,
                        "connection rejected by remote server",
                    ),
                })
            }
        }
    }

    /// Open a remote transaction for a scan or modify, if the target
    /// database supports transactions and none is open yet.
    pub fn begin_remote_xact(&self, handle: &SessionHandle) -> Result<()> {
        let mut cached = handle.lock();
        if !self.config.transactions || !cached.tx_enabled || cached.tx_depth > 0 {
            return Ok(());
        }

        let session = cached.session_mut();
        session
            .set_current()
            .map_err(|e| FdwError::remote("set connection", e))?;
        session
            .begin_work()
            .map_err(|e| FdwError::remote("begin work", e))?;
        cached.tx_depth = 1;
        debug!(conname = %cached.conname(), "remote transaction started");
        Ok(())
    }

    /// Enter a host savepoint level, mirroring it on every session with
    /// an open transaction below that depth.
    pub fn enter_subtransaction(&self, level: u32) -> Result<()> {
        debug_assert!(level >= 2);
        let name = self.config.savepoint_name(level);

        for (_, handle) in self.cache.handles() {
            let mut cached = handle.lock();
            if cached.tx_depth == 0 || cached.tx_depth >= level {
                continue;
            }
            let session = cached.session_mut();
            session
                .set_current()
                .map_err(|e| FdwError::remote("set connection", e))?;
            session
                .savepoint(&name)
                .map_err(|e| FdwError::remote("savepoint", e))?;
            cached.tx_depth = level;
            debug!(conname = %cached.conname(), level, "remote savepoint set");
        }
        Ok(())
    }

    /// Commit one nesting level. Level 1 is the top-level transaction;
    /// deeper levels release the matching savepoint. Only sessions whose
    /// recorded depth is at least `level` are touched; a session deeper
    /// than the host's current level has leaked a savepoint and is
    /// reported, not repaired.
    pub fn commit_nesting(&self, level: u32) -> Result<()> {
        self.finish_nesting(level, true)
    }

    /// Roll back one nesting level; the counterpart of
    /// [`commit_nesting`](Self::commit_nesting).
    pub fn rollback_nesting(&self, level: u32) -> Result<()> {
        self.finish_nesting(level, false)
    }

    fn finish_nesting(&self, level: u32, commit: bool) -> Result<()> {
        let mut first_err = None;

        for (_, handle) in self.cache.handles() {
            let mut cached = handle.lock();
            if cached.tx_depth < level {
                continue;
            }
            if cached.tx_depth > level {
                warn!(
                    conname = %cached.conname(),
                    recorded = cached.tx_depth,
                    current = level,
                    "session recorded at higher transaction depth than host level; lost savepoint?"
                );
            }

            let result = if level <= 1 {
                self.finish_top_level(&mut cached, commit)
            } else {
                self.finish_savepoint(&mut cached, level, commit)
            };

            if let Err(e) = result {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish_top_level(&self, cached: &mut CachedSession, commit: bool) -> Result<()> {
        let conname = cached.conname();
        let session = cached.session_mut();
        session
            .set_current()
            .map_err(|e| FdwError::remote("set connection", e))?;

        if commit {
            session.commit().map_err(|e| FdwError::remote("commit", e))?;
            cached.commits += 1;
            debug!(conname = %conname, "remote transaction committed");
        } else {
            session
                .rollback()
                .map_err(|e| FdwError::remote("rollback", e))?;
            cached.rollbacks += 1;
            debug!(conname = %conname, "remote transaction rolled back");
        }
        cached.tx_depth = 0;
        Ok(())
    }

    fn finish_savepoint(&self, cached: &mut CachedSession, level: u32, commit: bool) -> Result<()> {
        let name = self.config.savepoint_name(level);
        let session = cached.session_mut();
        session
            .set_current()
            .map_err(|e| FdwError::remote("set connection", e))?;

        if commit {
            session
                .release_savepoint(&name)
                .map_err(|e| FdwError::remote("release savepoint", e))?;
        } else {
            session
                .rollback_to_savepoint(&name)
                .map_err(|e| FdwError::remote("rollback to savepoint", e))?;
        }
        cached.tx_depth = level - 1;
        Ok(())
    }
}
