//! Per-frame staging commit
//!
//! Host to device transfers are reserved with [`StagingCommit::enqueue_staging`]
//! and recorded with [`StagingCommit::enqueue_eval`]. [`StagingCommit::commit`]
//! allocates one host-visible buffer for everything reserved since the last
//! commit, runs every writer in insertion order, then runs every recorder in
//! insertion order inside one submission and waits for it.

use super::error_recovery::GpuRecoveryError;

/// Slices start on this alignment (wgpu copy offset requirement).
pub const STAGING_ALIGNMENT: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingHandle(usize);

/// Location of one reservation inside the commit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingSlice {
    pub offset: u64,
    pub size: u64,
}

/// The device operations a commit needs.
pub trait StagingBackend {
    type Encoder;

    /// Create a mapped host-visible buffer of `size` bytes, hand its bytes to
    /// `fill`, then unmap it.
    fn fill_staging(
        &mut self,
        size: u64,
        fill: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), GpuRecoveryError>;

    /// Start recording transfer commands that read the filled buffer.
    fn begin(&mut self) -> Result<Self::Encoder, GpuRecoveryError>;

    /// Submit the recorded commands and wait for completion.
    fn submit_and_wait(&mut self, encoder: Self::Encoder) -> Result<(), GpuRecoveryError>;

    /// Release the staging buffer.
    fn release(&mut self);
}

type Writer = Box<dyn FnOnce(&mut [u8])>;
type Recorder<E> = Box<dyn FnOnce(&mut E, StagingSlice)>;

pub struct StagingCommit<B: StagingBackend> {
    backend: B,
    slices: Vec<StagingSlice>,
    writers: Vec<Writer>,
    recorders: Vec<(StagingSlice, Recorder<B::Encoder>)>,
    total: u64,
}

fn align_up(value: u64) -> u64 {
    value.div_ceil(STAGING_ALIGNMENT) * STAGING_ALIGNMENT
}

impl<B: StagingBackend> StagingCommit<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slices: Vec::new(),
            writers: Vec::new(),
            recorders: Vec::new(),
            total: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bytes reserved since the last commit.
    pub fn pending_bytes(&self) -> u64 {
        self.total
    }

    /// Reserve `size` bytes filled by `writer` at commit time.
    pub fn enqueue_staging<W>(&mut self, size: u64, writer: W) -> StagingHandle
    where
        W: FnOnce(&mut [u8]) + 'static,
    {
        let slice = StagingSlice {
            offset: self.total,
            size,
        };
        self.total = align_up(self.total + size);
        self.slices.push(slice);
        self.writers.push(Box::new(writer));
        StagingHandle(self.slices.len() - 1)
    }

    /// Record transfer commands reading the slice behind `handle`.
    pub fn enqueue_eval<R>(&mut self, handle: StagingHandle, recorder: R)
    where
        R: FnOnce(&mut B::Encoder, StagingSlice) + 'static,
    {
        match self.slices.get(handle.0) {
            Some(&slice) => self.recorders.push((slice, Box::new(recorder))),
            None => log::error!(
                "[Staging] Handle {} does not belong to the current commit",
                handle.0
            ),
        }
    }

    /// Upload everything queued since the last commit. The queues are empty
    /// afterwards whether or not the upload succeeded.
    pub fn commit(&mut self) -> Result<(), GpuRecoveryError> {
        let total = std::mem::take(&mut self.total);
        let slices = std::mem::take(&mut self.slices);
        let mut writers = std::mem::take(&mut self.writers);
        let recorders = std::mem::take(&mut self.recorders);

        if total == 0 {
            return Ok(());
        }

        let result = self.run(total, &slices, &mut writers, recorders);
        self.backend.release();

        match &result {
            Ok(()) => log::debug!(
                "[Staging] Committed {} bytes in {} transfers",
                total,
                slices.len()
            ),
            Err(e) => log::error!("[Staging] Commit of {} bytes failed: {}", total, e),
        }
        result
    }

    fn run(
        &mut self,
        total: u64,
        slices: &[StagingSlice],
        writers: &mut Vec<Writer>,
        recorders: Vec<(StagingSlice, Recorder<B::Encoder>)>,
    ) -> Result<(), GpuRecoveryError> {
        self.backend.fill_staging(total, &mut |bytes: &mut [u8]| {
            for (slice, writer) in slices.iter().zip(writers.drain(..)) {
                let start = slice.offset as usize;
                writer(&mut bytes[start..start + slice.size as usize]);
            }
        })?;

        let mut encoder = self.backend.begin()?;
        for (slice, recorder) in recorders {
            recorder(&mut encoder, slice);
        }
        self.backend.submit_and_wait(encoder)
    }

    /// Drop queued work without uploading it.
    pub fn shutdown(&mut self) {
        self.total = 0;
        self.slices.clear();
        self.writers.clear();
        self.recorders.clear();
        self.backend.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// In-memory backend that logs every device operation.
    #[derive(Default)]
    pub(crate) struct MemoryBackend {
        pub staging: Vec<u8>,
        pub log: Rc<RefCell<Vec<String>>>,
        pub submits: usize,
    }

    impl StagingBackend for MemoryBackend {
        type Encoder = Vec<String>;

        fn fill_staging(
            &mut self,
            size: u64,
            fill: &mut dyn FnMut(&mut [u8]),
        ) -> Result<(), GpuRecoveryError> {
            self.staging = vec![0; size as usize];
            fill(&mut self.staging);
            self.log.borrow_mut().push(format!("fill {}", size));
            Ok(())
        }

        fn begin(&mut self) -> Result<Vec<String>, GpuRecoveryError> {
            Ok(Vec::new())
        }

        fn submit_and_wait(&mut self, encoder: Vec<String>) -> Result<(), GpuRecoveryError> {
            self.submits += 1;
            self.log.borrow_mut().extend(encoder);
            Ok(())
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("release".into());
        }
    }

    #[test]
    fn test_writers_then_recorders_in_fifo_order() {
        let backend = MemoryBackend::default();
        let log = backend.log.clone();
        let mut staging = StagingCommit::new(backend);

        for i in 0..3u8 {
            let writer_log = log.clone();
            let handle = staging.enqueue_staging(3, move |bytes| {
                bytes.fill(i + 1);
                writer_log.borrow_mut().push(format!("write {}", i));
            });
            staging.enqueue_eval(handle, move |encoder: &mut Vec<String>, slice| {
                encoder.push(format!("copy {} at {}", i, slice.offset));
            });
        }
        assert_eq!(staging.pending_bytes(), 12);

        staging.commit().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "write 0", "write 1", "write 2", "fill 12", "copy 0 at 0", "copy 1 at 4",
                "copy 2 at 8", "release",
            ]
        );
        assert_eq!(staging.backend().submits, 1);
        assert_eq!(&staging.backend().staging[..], &[1, 1, 1, 0, 2, 2, 2, 0, 3, 3, 3, 0]);
        assert_eq!(staging.pending_bytes(), 0);
    }

    #[test]
    fn test_commit_without_reservations_is_noop() {
        let mut staging = StagingCommit::new(MemoryBackend::default());
        staging.commit().unwrap();
        assert_eq!(staging.backend().submits, 0);
        assert!(staging.backend().log.borrow().is_empty());
    }

    #[test]
    fn test_second_commit_runs_nothing_again() {
        let backend = MemoryBackend::default();
        let log = backend.log.clone();
        let mut staging = StagingCommit::new(backend);

        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        staging.enqueue_staging(8, move |_| *counter.borrow_mut() += 1);
        staging.commit().unwrap();
        staging.commit().unwrap();

        assert_eq!(*calls.borrow(), 1);
        assert_eq!(staging.backend().submits, 1);
        assert_eq!(log.borrow().iter().filter(|l| *l == "release").count(), 1);
    }
}
