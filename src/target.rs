//! Per-attachment runtime state. A `Target` owns the reservation map, the
//! remap table, the allocator, the counters, and the persistence engine;
//! device handles are shared with every in-flight bio. The persistence
//! worker holds an `Arc` of the inner state and the target holds only the
//! worker's queue handle, so teardown is: raise the shutdown flag, close
//! the queue, join the drained worker, final flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use log::{info, warn};

use crate::alloc::{SpareAllocator, DEFAULT_ALLOCATION_UNIT};
use crate::counters::{CountersSnapshot, TargetCounters};
use crate::device::{BlockDevice, DeviceFingerprint};
use crate::engine::{worker_loop, AutoRemapJob, Bio, BioResult, BioStatus};
use crate::error::{RemapError, Result};
use crate::integrity::MonotonicCounters;
use crate::meta::persist::PersistCore;
use crate::meta::placement::MetadataPlacement;
use crate::meta::reassembly;
use crate::reserve::ReservationMap;
use crate::table::RemapTable;

#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    /// Allocation unit in sectors.
    pub allocation_unit: u64,
    /// Whether main-device failures trigger automatic remapping.
    pub auto_remap: bool,
    /// Attach even when fingerprint confidence falls below the threshold.
    pub force_attach: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            allocation_unit: DEFAULT_ALLOCATION_UNIT,
            auto_remap: true,
            force_attach: false,
        }
    }
}

pub(crate) struct TargetInner {
    pub(crate) main: Arc<dyn BlockDevice>,
    pub(crate) spare: Arc<dyn BlockDevice>,
    pub(crate) reservations: ReservationMap,
    pub(crate) placement: MetadataPlacement,
    pub(crate) table: RwLock<RemapTable>,
    pub(crate) allocator: Mutex<SpareAllocator>,
    pub(crate) persist: Mutex<PersistCore>,
    pub(crate) sequence: MonotonicCounters,
    pub(crate) counters: TargetCounters,
    pub(crate) auto_remap: AtomicBool,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) dirty: AtomicBool,
    pub(crate) worker_tx: Mutex<Option<Sender<AutoRemapJob>>>,
}

impl TargetInner {
    /// Write the current table as a full image to every copy location.
    /// Serialized by the persist mutex; the snapshot is taken under it so
    /// images reach the spare in sequence order.
    pub(crate) fn persist_current(&self) -> Result<u64> {
        let mut core = self.persist.lock().expect("persist lock poisoned");
        let snapshot = self
            .table
            .read()
            .expect("remap table lock poisoned")
            .iter_snapshot();
        let sequence = self.sequence.next_sequence_number();
        match core.write_image(&snapshot, sequence, &self.counters) {
            Ok(()) => {
                self.dirty.store(false, Ordering::Release);
                Ok(sequence)
            }
            Err(err) => {
                self.dirty.store(true, Ordering::Release);
                Err(err)
            }
        }
    }
}

pub struct Target {
    pub(crate) inner: Arc<TargetInner>,
    worker: Option<JoinHandle<()>>,
}

impl Target {
    /// Attach: plan placement, reassemble persisted state, gate on device
    /// identity, seal an initial image, arm the worker.
    pub fn create(
        main: Arc<dyn BlockDevice>,
        spare: Arc<dyn BlockDevice>,
        config: TargetConfig,
    ) -> Result<Target> {
        if config.allocation_unit == 0 {
            return Err(RemapError::Configuration(
                "allocation unit must be at least one sector".to_string(),
            ));
        }
        if main.size_sectors() == 0 {
            return Err(RemapError::Configuration(
                "main device is empty".to_string(),
            ));
        }

        let placement = MetadataPlacement::plan(spare.size_sectors())?;
        let mut reservations = ReservationMap::new();
        placement.register(&mut reservations, config.allocation_unit)?;

        let counters = TargetCounters::new();
        let recovered =
            reassembly::recover(&main, &spare, &placement, config.force_attach, &counters)?;

        let mut table = RemapTable::new();
        let mut allocator = SpareAllocator::new(spare.size_sectors(), config.allocation_unit);
        let sequence = MonotonicCounters::new();
        if let Some(copy) = &recovered.copy {
            for entry in &copy.entries {
                if reservations.overlaps_range(entry.spare_sector, 1) {
                    warn!(
                        "recovered entry {} -> {} collides with a reserved extent; dropped",
                        entry.main_sector, entry.spare_sector
                    );
                    continue;
                }
                match table.insert(*entry) {
                    Ok(()) => allocator.mark_in_use(entry.spare_sector),
                    Err(err) => warn!("recovered entry dropped: {err}"),
                }
            }
            sequence.seed(copy.sequence, copy.sequence);
        }
        let restored = table.len();

        let persist = PersistCore::new(
            spare.clone(),
            placement.clone(),
            DeviceFingerprint::capture(main.as_ref()),
            DeviceFingerprint::capture(spare.as_ref()),
        );

        let inner = Arc::new(TargetInner {
            main,
            spare,
            reservations,
            placement,
            table: RwLock::new(table),
            allocator: Mutex::new(allocator),
            persist: Mutex::new(persist),
            sequence,
            counters,
            auto_remap: AtomicBool::new(config.auto_remap),
            shutting_down: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            worker_tx: Mutex::new(None),
        });

        // seal: every future reassembly finds a current image even before
        // the first remap exists
        inner.persist_current()?;

        let (sender, receiver) = mpsc::channel();
        *inner.worker_tx.lock().expect("worker queue lock poisoned") = Some(sender);
        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("sparemap-persist".to_string())
            .spawn(move || worker_loop(worker_inner, receiver))
            .map_err(RemapError::Device)?;

        info!(
            "attached main={} ({} sectors) spare={} ({} sectors): {} copies ({}), {} entries restored, confidence {}",
            inner.main.path(),
            inner.main.size_sectors(),
            inner.spare.path(),
            inner.spare.size_sectors(),
            inner.placement.copies(),
            inner.placement.strategy.name(),
            restored,
            recovered.confidence
        );

        Ok(Target {
            inner,
            worker: Some(worker),
        })
    }

    /// Submit a bio; every outcome is reported through its completion.
    pub fn submit(&self, bio: Bio) {
        self.inner.submit_bio(bio);
    }

    /// Synchronous read through the remap engine.
    pub fn read_at(&self, sector: u64, sectors: usize) -> Result<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        let bio = Bio::read(
            sector,
            sectors,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        self.submit(bio);
        wait_for(rx.recv())
    }

    /// Synchronous write through the remap engine.
    pub fn write_at(&self, sector: u64, data: Vec<u8>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let bio = Bio::write(
            sector,
            data,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        self.submit(bio);
        wait_for(rx.recv()).map(|_| ())
    }

    /// Single-line administrative message (§ admin command surface).
    pub fn message(&self, line: &str) -> Result<String> {
        crate::admin::dispatch(&self.inner, line)
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.inner.counters.snapshot()
    }

    pub fn remap_count(&self) -> usize {
        self.inner
            .table
            .read()
            .expect("remap table lock poisoned")
            .len()
    }

    pub fn set_auto_remap(&self, enabled: bool) {
        self.inner.auto_remap.store(enabled, Ordering::Relaxed);
    }

    /// Detach: reject new bios, drain the worker, flush once more if the
    /// in-memory state is ahead of the spare, release the devices.
    pub fn detach(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.inner.shutting_down.store(true, Ordering::Release);
        // closing the queue signals the worker to drain and exit
        *self
            .inner
            .worker_tx
            .lock()
            .expect("worker queue lock poisoned") = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("persistence worker panicked during drain");
            }
        }
        let mut result = Ok(());
        if self.inner.dirty.load(Ordering::Acquire) {
            result = self.inner.persist_current().map(|_| ());
        }
        info!("detached main={}", self.inner.main.path());
        result
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.shutdown() {
                warn!("final metadata flush failed on drop: {err}");
            }
        }
    }
}

fn wait_for(received: std::result::Result<BioResult, mpsc::RecvError>) -> Result<Vec<u8>> {
    let result = received
        .map_err(|_| RemapError::Device(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "bio completion dropped",
        )))?;
    match result.status {
        BioStatus::Ok => Ok(result.data),
        BioStatus::IoError => Err(RemapError::Device(std::io::Error::new(
            std::io::ErrorKind::Other,
            "i/o error",
        ))),
        BioStatus::Shutdown => Err(RemapError::SystemShutdown),
    }
}
