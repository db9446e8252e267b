//! Wires components C1–C9 together into the two session roles: a sender
//! host running two stream senders plus the bandwidth predictor, and a
//! receiver host running two stream receivers plus the downstream invoker
//! (spec §5: "parallel worker threads... synchronous and blocking").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{PredictorMode, SessionConfig};
use crate::error::{worst, PipelineError, Result};
use crate::invoker::DownstreamInvoker;
use crate::predictor::{derive_threshold, OracleFilePredictor, Predictor, SpectralPredictor};
use crate::protocol::StreamIdentity;
use crate::receiver::StreamReceiver;
use crate::sender::StreamSender;
use crate::step_table::StepTable;
use crate::telemetry::SenderShared;
use crate::transport::TcpTransport;

const PREDICTOR_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Sender-host session: reduced sender + augmentation sender + predictor.
pub struct SenderSession {
    config: SessionConfig,
}

impl SenderSession {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn run(self) -> Result<()> {
        let augmentation_enabled = !self.config.augmentation_files.is_empty();
        let shared = Arc::new(SenderShared::new(
            self.config.num_steps,
            self.config.telemetry_capacity,
        ));
        let stop = Arc::new(AtomicBool::new(false));

        let reduced_addr = self.config.addr_for(StreamIdentity::Reduced);
        let reduced_transport = TcpTransport::connect(&reduced_addr, StreamIdentity::Reduced)?;
        let reduced_files = self.config.files_for(StreamIdentity::Reduced).to_vec();
        let num_steps = self.config.num_steps;
        let chunk_size = self.config.chunk_size;
        let round_robin = self.config.round_robin_chunks;

        let reduced_shared = shared.clone();
        let reduced_handle = thread::spawn(move || -> Result<()> {
            let mut sender = StreamSender::new(
                reduced_transport,
                StreamIdentity::Reduced,
                reduced_files,
                chunk_size,
                round_robin,
                reduced_shared,
            );
            sender.run(num_steps)
        });

        let augmentation_handle = if augmentation_enabled {
            let aug_addr = self.config.addr_for(StreamIdentity::Augmentation);
            let aug_transport = TcpTransport::connect(&aug_addr, StreamIdentity::Augmentation)?;
            let aug_files = self.config.files_for(StreamIdentity::Augmentation).to_vec();
            let aug_shared = shared.clone();
            Some(thread::spawn(move || -> Result<()> {
                let mut sender = StreamSender::new(
                    aug_transport,
                    StreamIdentity::Augmentation,
                    aug_files,
                    chunk_size,
                    round_robin,
                    aug_shared,
                );
                sender.run(num_steps)
            }))
        } else {
            None
        };

        let predictor_handle = if augmentation_enabled && self.config.predictor_mode != PredictorMode::Disabled
        {
            let predictor_shared = shared.clone();
            let predictor_stop = stop.clone();
            let cadence = self.config.prediction_cadence.max(1);
            let lookahead = self.config.lookahead_steps;
            let link_bandwidth_mbps = self.config.link_bandwidth_mbps;
            let mode = self.config.predictor_mode;
            let oracle_path = self.config.oracle_path.clone();
            Some(thread::spawn(move || -> Result<()> {
                let mut predictor: Box<dyn Predictor> = match mode {
                    PredictorMode::Spectral => Box::new(SpectralPredictor::new()),
                    PredictorMode::OracleFile => Box::new(OracleFilePredictor::new(oracle_path)),
                    PredictorMode::Disabled => unreachable!("guarded above"),
                };
                run_predictor_loop(
                    predictor.as_mut(),
                    &predictor_shared,
                    &predictor_stop,
                    cadence,
                    lookahead,
                    link_bandwidth_mbps,
                )
            }))
        } else {
            None
        };

        let mut results = Vec::new();
        results.push(join_worker(reduced_handle));
        if let Some(handle) = augmentation_handle {
            results.push(join_worker(handle));
        }
        stop.store(true, Ordering::SeqCst);
        if let Some(handle) = predictor_handle {
            results.push(join_worker(handle));
        }

        worst(results)
    }
}

/// Receiver-host session: reduced receiver + augmentation receiver +
/// downstream invoker.
pub struct ReceiverSession {
    config: SessionConfig,
}

impl ReceiverSession {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn run(self) -> Result<()> {
        let augmentation_enabled = !self.config.augmentation_files.is_empty();
        let step_table = Arc::new(StepTable::new(self.config.num_steps, augmentation_enabled));

        // Bind every listener this session needs before accepting on any of
        // them. The sender connects reduced then augmentation back-to-back
        // with no barrier in between (spec §6 allows them to run over two
        // separate physical paths), so if the augmentation listener isn't
        // bound yet by the time the sender tries to connect to it, that
        // connect fails outright rather than queuing at the OS backlog.
        let reduced_addr = self.config.addr_for(StreamIdentity::Reduced);
        let reduced_listener = TcpTransport::bind(&reduced_addr)?;
        let augmentation_addr = self.config.addr_for(StreamIdentity::Augmentation);
        let augmentation_listener = if augmentation_enabled {
            Some(TcpTransport::bind(&augmentation_addr)?)
        } else {
            None
        };

        let reduced_transport =
            TcpTransport::accept_on(&reduced_listener, &reduced_addr, StreamIdentity::Reduced)?;
        let output_root = self.config.output_root.clone();
        let reduced_table = step_table.clone();
        let reduced_root = output_root.clone();
        let reduced_handle = thread::spawn(move || -> Result<()> {
            let mut receiver = StreamReceiver::new(
                reduced_transport,
                StreamIdentity::Reduced,
                reduced_root,
                reduced_table,
            );
            receiver.run()
        });

        let augmentation_handle = if let Some(listener) = augmentation_listener {
            let aug_transport = TcpTransport::accept_on(
                &listener,
                &augmentation_addr,
                StreamIdentity::Augmentation,
            )?;
            let aug_table = step_table.clone();
            let aug_root = output_root.clone();
            Some(thread::spawn(move || -> Result<()> {
                let mut receiver = StreamReceiver::new(
                    aug_transport,
                    StreamIdentity::Augmentation,
                    aug_root,
                    aug_table,
                );
                receiver.run()
            }))
        } else {
            None
        };

        let invoker_table = step_table.clone();
        let invoker = DownstreamInvoker::new(
            invoker_table,
            self.config.processor_path.clone(),
            output_root,
        );
        let invoker_handle = thread::spawn(move || invoker.run());

        let mut results = Vec::new();
        results.push(join_worker(reduced_handle));
        if let Some(handle) = augmentation_handle {
            results.push(join_worker(handle));
        }
        // The invoker only returns once wait_and_take_next runs dry, which
        // happens once every step is released or request_shutdown is
        // called; nothing calls the latter today, so this join happens
        // naturally once every configured step completes.
        results.push(join_worker(invoker_handle));

        worst(results)
    }
}

fn join_worker(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Shutdown),
    }
}

/// Predictor worker loop (spec §4.3 trigger policy): wakes periodically,
/// acts only when a fresh step boundary has been crossed since the last
/// action and `S_aug` is a multiple of the prediction cadence.
fn run_predictor_loop(
    predictor: &mut dyn Predictor,
    shared: &SenderShared,
    stop: &AtomicBool,
    cadence: u64,
    lookahead: u64,
    link_bandwidth_mbps: f64,
) -> Result<()> {
    let mut last_acted_step: Option<u64> = None;
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(PREDICTOR_POLL_INTERVAL);
        let s_aug = shared.s_aug();
        let fresh_boundary = last_acted_step != Some(s_aug);
        if !fresh_boundary || s_aug % cadence != 0 {
            continue;
        }
        last_acted_step = Some(s_aug);

        let samples = shared.drain_samples();
        match predictor.estimate_rate_bytes_per_sec(&samples) {
            Ok(rate) => {
                let threshold = derive_threshold(rate, link_bandwidth_mbps);
                shared.write_threshold_window(s_aug, lookahead, threshold);
                info!(s_aug, threshold, "predictor wrote new threshold window");
            }
            Err(e) => {
                warn!(s_aug, error = %e, "predictor cycle skipped, threshold unchanged");
            }
        }
    }
    Ok(())
}
