use futures::channel::mpsc::{channel, Sender};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::TiltConfig;
use crate::tilt::estimator::TiltEstimator;
use crate::tilt::types::{AccelSample, TiltReading};

/// Runs a [`TiltEstimator`] on its own task. Samples go into the returned sender; every
/// reading that passes the threshold is forwarded to all `senders`.
pub fn tilt_task(
    config: TiltConfig,
    cancel: CancellationToken,
    mut senders: Vec<Sender<TiltReading>>,
) -> (Sender<AccelSample>, JoinHandle<()>) {
    let (sample_sender, mut sample_receiver) = channel::<AccelSample>(128);

    let handle = spawn(async move {
        let mut estimator = TiltEstimator::new(config);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                sample = sample_receiver.next() => match sample {
                    Some(sample) => {
                        if let Some(reading) = estimator.on_sample(sample) {
                            for sender in &mut senders {
                                if sender.send(reading).await.is_err() {
                                    debug!("A tilt reading listener went away");
                                }
                            }
                        }
                    },
                    None => break 'mainloop,
                },
            }
        }
    });

    (sample_sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readings_are_forwarded() {
        let (reading_sender, mut readings) = channel::<TiltReading>(8);
        let (mut samples, handle) = tilt_task(TiltConfig::default(), CancellationToken::new(), vec![reading_sender]);

        samples.send(AccelSample::new(0.0, 0.0, -9.8)).await.unwrap();
        samples.send(AccelSample::new(0.01, 0.0, -9.8)).await.unwrap();
        samples.send(AccelSample::new(9.8, 0.0, 0.0)).await.unwrap();
        drop(samples);
        handle.await.unwrap();

        let first = readings.next().await.unwrap();
        assert_eq!(first.sample, AccelSample::new(0.0, 0.0, -9.8));

        let second = readings.next().await.unwrap();
        assert!((second.x_degrees - 90.0).abs() < 1e-3);

        assert_eq!(readings.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_task() {
        let cancel = CancellationToken::new();
        let (_samples, handle) = tilt_task(TiltConfig::default(), cancel.clone(), Vec::new());

        cancel.cancel();
        handle.await.unwrap();
    }
}
