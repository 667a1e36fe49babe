//! Audio visualizer sampler.
//!
//! Turns the remote audio tap into a stream of [`VolumeSample`]s at about
//! animation-frame rate. The level is the average of a smoothed, dB-scaled
//! magnitude spectrum mapped onto 0..=255, the same reduction a browser
//! analyser node performs. When no remote signal turns up within the
//! acquisition window the sampler degrades to synthetic samples so the meter
//! keeps moving.

use std::sync::Arc;

use parley_observe::{EventPayload, EventSink};
use parley_types::VolumeSample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SamplerConfig;
use crate::transport::{ChannelEvent, RemoteAudioSignal, SessionTransport};

/// Frequency-domain energy meter.
pub struct SpectrumAnalyser {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl SpectrumAnalyser {
    pub fn new(config: &SamplerConfig) -> Self {
        let size = config.fft_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let spectrum = fft.make_output_vec();

        // Blackman window
        let window = (0..size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / size as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            fft,
            window,
            input: vec![0.0; size],
            spectrum,
            smoothed: vec![0.0; size / 2],
            smoothing: config.smoothing.clamp(0.0, 0.999),
            min_db: config.min_db,
            max_db: config.max_db.max(config.min_db + 1.0),
        }
    }

    /// Level of the latest frame on a 0..=255 scale.
    ///
    /// `frame` holds the most recent samples, oldest first. Short frames are
    /// zero-padded at the front.
    pub fn level(&mut self, frame: &[f32]) -> f32 {
        let size = self.input.len();
        let frame = &frame[frame.len().saturating_sub(size)..];
        let pad = size - frame.len();
        for (i, slot) in self.input.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { frame[i - pad] };
            *slot = sample * self.window[i];
        }

        if self.fft.process(&mut self.input, &mut self.spectrum).is_err() {
            return 0.0;
        }

        let scale = 255.0 / (self.max_db - self.min_db);
        let mut total = 0.0;
        for (bin, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[bin].norm() / size as f32;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            if *smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                total += ((db - self.min_db) * scale).clamp(0.0, VolumeSample::MAX);
            }
        }
        total / self.smoothed.len() as f32
    }
}

/// Spawns the sampler. Samples go to `out` until the receiver is dropped.
pub fn spawn_sampler(
    config: SamplerConfig,
    transport: Arc<dyn SessionTransport>,
    out: mpsc::Sender<VolumeSample>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let events = transport.subscribe();
        match acquire_signal(&config, transport.as_ref(), events).await {
            Some(signal) => {
                tracing::info!("remote audio acquired");
                sink.emit(EventPayload::AudioAcquired { synthetic: false });
                sample_signal(&config, signal, out).await;
            }
            None => {
                tracing::warn!(
                    attempts = config.acquire_attempts,
                    "no remote audio signal, using synthetic visualizer"
                );
                sink.emit(EventPayload::AudioAcquired { synthetic: true });
                sample_synthetic(&config, out).await;
            }
        }
    })
}

/// Looks for the remote audio signal, polling at a fixed interval. A
/// `RemoteAudioAvailable` event cuts the wait short.
pub(crate) async fn acquire_signal(
    config: &SamplerConfig,
    transport: &dyn SessionTransport,
    mut events: broadcast::Receiver<ChannelEvent>,
) -> Option<Arc<dyn RemoteAudioSignal>> {
    for attempt in 1..=config.acquire_attempts {
        if let Some(signal) = transport.remote_audio_signal() {
            tracing::debug!(attempt, "remote audio signal found");
            return Some(signal);
        }

        let wait = tokio::time::sleep(config.acquire_interval());
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                event = events.recv() => match event {
                    Ok(ChannelEvent::RemoteAudioAvailable) => break,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        (&mut wait).await;
                        break;
                    }
                },
            }
        }
    }
    transport.remote_audio_signal()
}

async fn sample_signal(
    config: &SamplerConfig,
    signal: Arc<dyn RemoteAudioSignal>,
    out: mpsc::Sender<VolumeSample>,
) {
    let mut analyser = SpectrumAnalyser::new(config);
    let mut frame = vec![0.0; config.fft_size.max(2)];
    let mut ticker = tokio::time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let n = signal.read_frame(&mut frame);
        let level = analyser.level(&frame[..n]);
        if out.send(VolumeSample::measured(level)).await.is_err() {
            break;
        }
    }
}

async fn sample_synthetic(config: &SamplerConfig, out: mpsc::Sender<VolumeSample>) {
    let mut rng = StdRng::from_entropy();
    let (low, high) = if config.synthetic_max > config.synthetic_min {
        (config.synthetic_min, config.synthetic_max)
    } else {
        (config.synthetic_min, config.synthetic_min + 1.0)
    };
    let mut ticker = tokio::time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let level = rng.gen_range(low..high);
        if out.send(VolumeSample::synthetic(level)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AudioTap, InMemoryTransport};
    use std::time::Duration;

    fn noise(len: usize, amplitude: f32) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..len).map(|_| rng.gen_range(-amplitude..amplitude)).collect()
    }

    #[test]
    fn silence_reads_zero() {
        let mut analyser = SpectrumAnalyser::new(&SamplerConfig::default());
        assert_eq!(analyser.level(&[0.0; 256]), 0.0);
        assert_eq!(analyser.level(&[]), 0.0);
    }

    #[test]
    fn broadband_speech_level_crosses_activity_threshold() {
        let mut analyser = SpectrumAnalyser::new(&SamplerConfig::default());
        let frame = noise(256, 0.5);
        let first = analyser.level(&frame);
        assert!(first > 12.0, "level was {first}");

        let mut settled = first;
        for _ in 0..20 {
            settled = analyser.level(&frame);
        }
        assert!(settled >= first);
        assert!(settled <= VolumeSample::MAX);
    }

    #[test]
    fn quiet_noise_stays_below_threshold() {
        let mut analyser = SpectrumAnalyser::new(&SamplerConfig::default());
        let frame = noise(256, 0.000_01);
        let mut level = 0.0;
        for _ in 0..20 {
            level = analyser.level(&frame);
        }
        assert!(level < 12.0, "level was {level}");
    }

    #[tokio::test(start_paused = true)]
    async fn availability_event_beats_the_poll() {
        let transport = Arc::new(InMemoryTransport::new());
        let config = SamplerConfig::default();
        let events = transport.subscribe();

        let lookup = {
            let transport = transport.clone();
            tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                let found = acquire_signal(&config, transport.as_ref(), events).await;
                (found.is_some(), started.elapsed())
            })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        transport.attach_audio(Arc::new(AudioTap::new(512)));

        let (found, elapsed) = lookup.await.unwrap();
        assert!(found);
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn degrades_to_synthetic_after_retry_window() {
        let transport: Arc<dyn SessionTransport> = Arc::new(InMemoryTransport::new());
        let config = SamplerConfig::default();
        let (tx, mut rx) = mpsc::channel(8);

        let started = tokio::time::Instant::now();
        let handle = spawn_sampler(config, transport, tx, Arc::new(parley_observe::NoopSink));

        let sample = rx.recv().await.unwrap();
        assert!(sample.synthetic);
        assert!((5.0..25.0).contains(&sample.level));
        assert!(started.elapsed() >= Duration::from_secs(10));
        handle.abort();
    }
}
