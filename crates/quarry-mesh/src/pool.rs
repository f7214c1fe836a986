//! Background section-build pool.
//!
//! Workers pull [`BuildJob`]s from a shared channel, mesh the snapshot, and
//! report one [`BuildCompletion`] per job, whether the mesher succeeded,
//! failed, or panicked. The pool never limits submissions itself; the caller
//! keeps in-flight work bounded with a [`BuilderBudget`](crate::BuilderBudget).

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use quarry_world::{BuildPosition, SectionSnapshot};
use tracing::{debug, trace};

use crate::mesher::{BuildError, SectionMesh, SectionMesher};

/// A self-contained build request: an immutable snapshot of one section and
/// its neighbours.
#[derive(Clone, Debug)]
pub struct BuildJob {
    pub snapshot: SectionSnapshot,
}

impl BuildJob {
    pub fn new(snapshot: SectionSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn position(&self) -> BuildPosition {
        self.snapshot.position
    }
}

/// Result of a build.
#[derive(Debug)]
pub enum BuildOutcome {
    Built(SectionMesh),
    Failed(BuildError),
}

/// Sent back to the scheduler once per dispatched build.
#[derive(Debug)]
pub struct BuildCompletion {
    pub position: BuildPosition,
    pub outcome: BuildOutcome,
}

impl BuildCompletion {
    pub fn built(position: BuildPosition, mesh: SectionMesh) -> Self {
        Self {
            position,
            outcome: BuildOutcome::Built(mesh),
        }
    }

    pub fn failed(position: BuildPosition, error: BuildError) -> Self {
        Self {
            position,
            outcome: BuildOutcome::Failed(error),
        }
    }
}

/// Worker-side handle onto the scheduler's completion channel.
#[derive(Clone, Debug)]
pub struct CompletionSender {
    tx: Sender<BuildCompletion>,
}

impl CompletionSender {
    pub fn new(tx: Sender<BuildCompletion>) -> Self {
        Self { tx }
    }

    /// Report a finished build. Callable from any thread. Returns `false` if
    /// the scheduler is gone.
    pub fn report_complete(&self, completion: BuildCompletion) -> bool {
        self.tx.send(completion).is_ok()
    }
}

/// Pool of named worker threads running a shared [`SectionMesher`].
pub struct BuildPool {
    /// `None` after shutdown.
    job_sender: Option<Sender<BuildJob>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl BuildPool {
    /// Spawn `worker_count` threads named `section-builder-{i}`.
    pub fn new(
        worker_count: usize,
        mesher: Arc<dyn SectionMesher>,
        completions: CompletionSender,
    ) -> io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<BuildJob>();

        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = job_rx.clone();
            let tx = completions.clone();
            let mesher = Arc::clone(&mesher);
            let handle = std::thread::Builder::new()
                .name(format!("section-builder-{i}"))
                .spawn(move || worker_loop(&rx, mesher.as_ref(), &tx))?;
            handles.push(handle);
        }

        debug!(workers = worker_count, "section build pool started");
        Ok(Self {
            job_sender: Some(job_tx),
            worker_handles: handles,
        })
    }

    /// Queue a job without blocking. Hands the job back if the pool has been
    /// shut down, so the caller can reclaim its slot.
    #[allow(clippy::result_large_err)]
    pub fn submit(&self, job: BuildJob) -> Result<(), BuildJob> {
        match &self.job_sender {
            Some(sender) => sender.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Close the job channel and join every worker. Jobs already queued are
    /// still built and reported first.
    pub fn shutdown(&mut self) {
        self.job_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for BuildPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Receiver<BuildJob>, mesher: &dyn SectionMesher, tx: &CompletionSender) {
    while let Ok(job) = rx.recv() {
        let position = job.position();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| mesher.build(&job.snapshot))) {
            Ok(Ok(mesh)) => BuildOutcome::Built(mesh),
            Ok(Err(err)) => BuildOutcome::Failed(err),
            Err(_) => BuildOutcome::Failed(BuildError::Panicked),
        };
        trace!(?position, "section build finished");
        if !tx.report_complete(BuildCompletion { position, outcome }) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use quarry_world::{BlockId, SectionBlocks};

    use super::*;
    use crate::mesher::CulledMesher;

    fn job_at(x: i32, y: i32, z: i32, blocks: SectionBlocks) -> BuildJob {
        BuildJob::new(SectionSnapshot::isolated(
            BuildPosition::new(x, y, z),
            Arc::new(blocks),
        ))
    }

    fn collect(rx: &Receiver<BuildCompletion>, n: usize) -> Vec<BuildCompletion> {
        let mut out = Vec::new();
        let start = Instant::now();
        while out.len() < n {
            if let Ok(c) = rx.recv_timeout(Duration::from_millis(10)) {
                out.push(c);
            }
            assert!(start.elapsed().as_secs() < 5, "Timed out waiting for completions");
        }
        out
    }

    #[test]
    fn test_build_reports_mesh() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = BuildPool::new(2, Arc::new(CulledMesher), CompletionSender::new(tx)).unwrap();

        let mut blocks = SectionBlocks::new();
        blocks.set(1, 1, 1, BlockId(1));
        pool.submit(job_at(0, 0, 0, blocks)).unwrap();

        let done = collect(&rx, 1);
        assert_eq!(done[0].position, BuildPosition::new(0, 0, 0));
        match &done[0].outcome {
            BuildOutcome::Built(mesh) => assert_eq!(mesh.quad_count(), 6),
            other => panic!("expected a mesh, got {other:?}"),
        }
    }

    #[test]
    fn test_every_job_reports_exactly_once() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = BuildPool::new(4, Arc::new(CulledMesher), CompletionSender::new(tx)).unwrap();

        for i in 0..16 {
            pool.submit(job_at(i, 0, 0, SectionBlocks::new())).unwrap();
        }
        let mut positions: Vec<_> = collect(&rx, 16).into_iter().map(|c| c.position).collect();
        positions.sort();
        let expected: Vec<_> = (0..16).map(|i| BuildPosition::new(i, 0, 0)).collect();
        assert_eq!(positions, expected);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_panicking_mesher_still_reports() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mesher = |_: &SectionSnapshot| -> Result<SectionMesh, BuildError> {
            panic!("boom");
        };
        let pool = BuildPool::new(1, Arc::new(mesher), CompletionSender::new(tx)).unwrap();

        pool.submit(job_at(3, 1, 3, SectionBlocks::new())).unwrap();
        pool.submit(job_at(4, 1, 3, SectionBlocks::new())).unwrap();

        let done = collect(&rx, 2);
        for c in &done {
            assert!(matches!(c.outcome, BuildOutcome::Failed(BuildError::Panicked)));
        }
    }

    #[test]
    fn test_mesher_error_reported_as_failure() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mesher = |_: &SectionSnapshot| -> Result<SectionMesh, BuildError> {
            Err(BuildError::Mesher("missing neighbor".into()))
        };
        let pool = BuildPool::new(1, Arc::new(mesher), CompletionSender::new(tx)).unwrap();
        pool.submit(job_at(0, 0, 0, SectionBlocks::new())).unwrap();

        let done = collect(&rx, 1);
        assert!(matches!(done[0].outcome, BuildOutcome::Failed(BuildError::Mesher(_))));
    }

    #[test]
    fn test_submit_after_shutdown_returns_job() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut pool =
            BuildPool::new(1, Arc::new(CulledMesher), CompletionSender::new(tx)).unwrap();
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);

        let job = job_at(9, 9, 9, SectionBlocks::new());
        let returned = pool.submit(job).unwrap_err();
        assert_eq!(returned.position(), BuildPosition::new(9, 9, 9));
    }

    #[test]
    fn test_queued_jobs_complete_before_shutdown_returns() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool =
            BuildPool::new(1, Arc::new(CulledMesher), CompletionSender::new(tx)).unwrap();
        for i in 0..3 {
            pool.submit(job_at(i, 0, 0, SectionBlocks::new())).unwrap();
        }
        pool.shutdown();
        assert_eq!(rx.try_iter().count(), 3);
    }
}
