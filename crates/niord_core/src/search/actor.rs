//! Worker thread that exclusively owns a [`MessageIndex`].
//!
//! # Responsibility
//! - Run incremental index updates every poll interval.
//! - Serialize searches, manual updates and rebuilds through one channel.
//!
//! # Invariants
//! - Only the worker thread touches the index and its store connection.
//! - A tick runs once per poll interval regardless of how many commands
//!   arrive in between.

use crate::config::IndexSettings;
use crate::repo::message_repo::SqliteMessageRepository;
use crate::search::index::{IndexQuery, MessageIndex, SearchHit};
use crate::search::{SearchError, SearchResult};
use log::{error, info};
use rusqlite::Connection;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

enum IndexCommand {
    UpdateNow(Sender<usize>),
    Recreate(Sender<SearchResult<usize>>),
    Search(IndexQuery, Sender<SearchResult<Vec<SearchHit>>>),
    DocumentCount(Sender<SearchResult<usize>>),
    Shutdown,
}

/// Handle to the index worker. Dropping the handle stops the worker.
pub struct IndexActor {
    commands: Sender<IndexCommand>,
    handle: Option<JoinHandle<()>>,
}

impl IndexActor {
    /// Starts the worker. `store` must be a migrated message store
    /// connection; it is moved into the worker together with `index`.
    ///
    /// The first incremental update runs immediately.
    pub fn spawn(
        index: MessageIndex,
        store: Connection,
        settings: IndexSettings,
    ) -> SearchResult<Self> {
        SqliteMessageRepository::try_new(&store)?;

        let (commands, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("niord-index".to_string())
            .spawn(move || run_worker(index, store, settings, receiver))
            .map_err(SearchError::Spawn)?;

        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Runs one incremental update now and returns how many messages it
    /// processed.
    pub fn update_now(&self) -> SearchResult<usize> {
        self.request(IndexCommand::UpdateNow)
    }

    pub fn recreate(&self) -> SearchResult<usize> {
        self.request(IndexCommand::Recreate)?
    }

    pub fn search(&self, query: IndexQuery) -> SearchResult<Vec<SearchHit>> {
        self.request(|reply| IndexCommand::Search(query, reply))?
    }

    pub fn document_count(&self) -> SearchResult<usize> {
        self.request(IndexCommand::DocumentCount)?
    }

    /// Stops the worker and waits for it to finish.
    pub fn shutdown(mut self) -> SearchResult<()> {
        self.stop()
    }

    fn request<T, F>(&self, command: F) -> SearchResult<T>
    where
        F: FnOnce(Sender<T>) -> IndexCommand,
    {
        let (reply, response) = mpsc::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SearchError::ActorStopped)?;
        response.recv().map_err(|_| SearchError::ActorStopped)
    }

    fn stop(&mut self) -> SearchResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // The worker may already be gone; joining reports how it ended.
        let _ = self.commands.send(IndexCommand::Shutdown);
        handle.join().map_err(|_| SearchError::ActorStopped)
    }
}

impl Drop for IndexActor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("event=index_actor_stop module=search status=error error={err}");
        }
    }
}

fn run_worker(
    mut index: MessageIndex,
    store: Connection,
    settings: IndexSettings,
    receiver: Receiver<IndexCommand>,
) {
    let repo = match SqliteMessageRepository::try_new(&store) {
        Ok(repo) => repo,
        Err(err) => {
            error!("event=index_actor_start module=search status=error error={err}");
            return;
        }
    };
    let interval = settings.poll_interval();
    info!(
        "event=index_actor_start module=search status=ok poll_interval_secs={} batch_size={}",
        settings.poll_interval_secs, settings.batch_size
    );

    let mut next_tick = Some(Instant::now());
    loop {
        if next_tick.is_some_and(|tick| Instant::now() >= tick) {
            index.update_index(&repo, settings.batch_size);
            // `None` when the interval reaches past the clock's range.
            next_tick = Instant::now().checked_add(interval);
        }

        let command = match next_tick {
            Some(tick) => receiver.recv_timeout(tick.saturating_duration_since(Instant::now())),
            None => receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match command {
            Ok(IndexCommand::UpdateNow(reply)) => {
                let _ = reply.send(index.update_index(&repo, settings.batch_size));
            }
            Ok(IndexCommand::Recreate(reply)) => {
                let _ = reply.send(index.recreate_index(&repo, settings.batch_size));
            }
            Ok(IndexCommand::Search(query, reply)) => {
                let _ = reply.send(index.search(&query));
            }
            Ok(IndexCommand::DocumentCount(reply)) => {
                let _ = reply.send(index.document_count());
            }
            Ok(IndexCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!("event=index_actor_stop module=search status=ok");
}
