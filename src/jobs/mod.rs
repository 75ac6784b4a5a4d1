use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use crate::auth::Profile;
use crate::chunk::world::TickSummary;
use crate::chunk::RegionPos;
use crate::protocol_util::now_millis;
use crate::registry::SessionId;
use crate::Server;

mod handlers;

/// Work that touches more than one connection, or the world, run by the job worker.
#[derive(Debug, Clone)]
pub(crate) enum Job {
    KeepAlive(SessionId),
    BroadcastChatMessage { sender: Profile, text: String },
    PlayerJoined(SessionId),
    PlayerLeft { uuid: Uuid, username: String },
    UpdateLatencies,
    TickRegion(RegionPos),
    UnloadRegion { region: RegionPos, attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    Done,
    /// The job's target no longer exists.
    Stale,
    Pinged,
    TimedOut,
    Ticked(TickSummary),
    Unloaded,
    /// The region still had loaded chunks.
    Busy,
}

/// How often a busy region unload is tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) retry_after: Duration,
    pub(crate) max_attempts: u32,
}

impl RetryPolicy {
    /// Attempts count from 1.
    pub(crate) fn next_attempt(&self, attempt: u32) -> Option<u32> {
        (attempt < self.max_attempts).then_some(attempt + 1)
    }
}

pub(crate) struct JobQueue {
    sender: UnboundedSender<Job>,
}

impl JobQueue {
    pub(crate) fn new() -> (Self, UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub(crate) fn push(&self, job: Job) {
        if let Err(e) = self.sender.send(job) {
            debug!("Job queue closed, dropping {:?}", e.0);
        }
    }

    /// Pushes `job` after `delay`. Aborting the returned handle cancels it.
    pub(crate) fn schedule(&self, job: Job, delay: Duration) -> AbortHandle {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(job);
        })
        .abort_handle()
    }
}

/// Runs one job to completion.
pub(crate) fn handle_job(server: &Server, job: &Job, now: i64) -> JobOutcome {
    match job {
        Job::KeepAlive(id) => handlers::keep_alive(server, *id, now),
        Job::BroadcastChatMessage { sender, text } => handlers::broadcast_chat(server, sender, text),
        Job::PlayerJoined(id) => handlers::player_joined(server, *id),
        Job::PlayerLeft { uuid, username } => handlers::player_left(server, *uuid, username),
        Job::UpdateLatencies => handlers::update_latencies(server),
        Job::TickRegion(region) => handlers::tick_region(server, *region),
        Job::UnloadRegion { region, .. } => handlers::unload_region(server, *region),
    }
}

/// Schedules whatever a job's outcome asks for next.
pub(crate) fn follow_up(server: &Server, job: Job, outcome: JobOutcome) {
    match (job, outcome) {
        (job @ Job::KeepAlive(id), JobOutcome::Pinged) => {
            if let Some(client) = server.registry.get(id) {
                client.set_keep_alive(server.jobs.schedule(job, server.config.keep_alive_interval));
            }
        }
        (Job::UnloadRegion { region, attempt }, JobOutcome::Busy) => {
            let policy = server.eviction_policy();
            match policy.next_attempt(attempt) {
                Some(attempt) => {
                    server
                        .jobs
                        .schedule(Job::UnloadRegion { region, attempt }, policy.retry_after);
                }
                None => debug!("Region {region:?} still busy after {attempt} attempts"),
            }
        }
        _ => {}
    }
}

/// Drains the job queue until the server shuts down.
pub(crate) async fn run_worker(server: Arc<Server>, mut jobs: UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let outcome = handle_job(&server, &job, now_millis());
        trace!("{job:?}: {outcome:?}");
        follow_up(&server, job, outcome);
    }
}

/// Starts the periodic job producers: region ticks, latency updates and eviction sweeps.
pub(crate) fn start_timers(server: &Arc<Server>) -> Vec<JoinHandle<()>> {
    let tick = {
        let server = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                for region in server.world.regions() {
                    server.jobs.push(Job::TickRegion(region));
                }
            }
        })
    };
    let latency = {
        let server = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(server.config.latency_interval).await;
                server.jobs.push(Job::UpdateLatencies);
            }
        })
    };
    let eviction = {
        let server = server.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(server.config.eviction_interval).await;
                for region in server.world.sweep() {
                    server.jobs.push(Job::UnloadRegion { region, attempt: 1 });
                }
            }
        })
    };
    vec![tick, latency, eviction]
}

const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::{ChunkPos, Ticket};
    use crate::test_server;

    #[test]
    fn retry_policy_stops_at_max_attempts() {
        let policy = RetryPolicy {
            retry_after: Duration::from_millis(1),
            max_attempts: 3,
        };
        assert_eq!(policy.next_attempt(1), Some(2));
        assert_eq!(policy.next_attempt(2), Some(3));
        assert_eq!(policy.next_attempt(3), None);
    }

    #[tokio::test]
    async fn unload_region_with_no_chunks_unloads() {
        let (server, _jobs) = test_server();
        let region = RegionPos::new(0, 0);
        let pos = ChunkPos::new(0, 0);
        server.world.load_chunk(pos, Ticket::Ticking);
        assert!(server.world.unload_chunk(pos));

        let job = Job::UnloadRegion { region, attempt: 1 };
        assert_eq!(handle_job(&server, &job, 0), JobOutcome::Unloaded);
        assert!(server.world.region(region).is_none());
    }

    #[tokio::test]
    async fn unload_region_with_a_loaded_chunk_is_busy_and_retried() {
        let (server, mut jobs) = test_server();
        let region = RegionPos::new(0, 0);
        server.world.load_chunk(ChunkPos::new(1, 1), Ticket::Ticking);

        let job = Job::UnloadRegion { region, attempt: 1 };
        let outcome = handle_job(&server, &job, 0);
        assert_eq!(outcome, JobOutcome::Busy);
        assert!(server.world.region(region).is_some());

        follow_up(&server, job, outcome);
        let retried = tokio::time::timeout(Duration::from_secs(2), jobs.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            retried,
            Job::UnloadRegion { attempt: 2, .. }
        ));
    }

    #[tokio::test]
    async fn exhausted_unload_is_not_retried() {
        let (server, mut jobs) = test_server();
        let region = RegionPos::new(0, 0);
        server.world.load_chunk(ChunkPos::new(1, 1), Ticket::Ticking);
        let attempt = server.eviction_policy().max_attempts;
        let job = Job::UnloadRegion { region, attempt };
        let outcome = handle_job(&server, &job, 0);
        follow_up(&server, job, outcome);
        assert!(tokio::time::timeout(Duration::from_millis(100), jobs.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn tick_region_summarises_tickets() {
        let (server, _jobs) = test_server();
        server.world.load_chunk(ChunkPos::new(0, 0), Ticket::EntityTicking);
        server.world.load_chunk(ChunkPos::new(0, 1), Ticket::Border);
        let outcome = handle_job(&server, &Job::TickRegion(RegionPos::new(0, 0)), 0);
        assert_eq!(
            outcome,
            JobOutcome::Ticked(TickSummary {
                entity_ticking: 1,
                block_ticking: 1,
                border: 2,
            })
        );
        assert_eq!(
            handle_job(&server, &Job::TickRegion(RegionPos::new(9, 9)), 0),
            JobOutcome::Stale
        );
    }
}
