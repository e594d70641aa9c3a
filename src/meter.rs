use core::time::Duration;
use std::num::NonZeroUsize;

use crate::{flow::PulseCounter, smoothing::SmoothingWindow};

/// Length of one counting window. The calibration factor is expressed per second of
/// pulses, so this is fixed rather than configurable.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Anything that can suspend the current task for a while.
#[allow(async_fn_in_trait)]
pub trait Pause {
    type Error;
    async fn pause(&mut self, duration: Duration) -> Result<(), Self::Error>;
}

#[cfg(target_os = "espidf")]
mod timer {
    use core::time::Duration;
    use embedded_svc::utils::asyncify::timer::AsyncTimer;
    use esp_idf_svc::timer::EspTimer;
    use esp_idf_sys::EspError;

    impl super::Pause for AsyncTimer<EspTimer> {
        type Error = EspError;
        async fn pause(&mut self, duration: Duration) -> Result<(), EspError> {
            self.after(duration)?.await;
            Ok(())
        }
    }
}

/// Unrounded flow rate in L/min for the pulses seen in one interval.
pub fn raw_rate(pulses: u64, calibration: f32) -> f32 {
    pulses as f32 / calibration
}

pub fn round_centi(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

pub fn flow_rate(pulses: u64, calibration: f32) -> f32 {
    round_centi(raw_rate(pulses, calibration))
}

/// Counts the pulses that arrive while the task is suspended for `interval`.
pub async fn sample<P: Pause>(counter: &PulseCounter, pause: &mut P, interval: Duration) -> Result<u64, P::Error> {
    let start = counter.snapshot();
    pause.pause(interval).await?;
    Ok(counter.since(start))
}

pub struct FlowMeter {
    calibration: f32,
    window: SmoothingWindow,
}

impl FlowMeter {
    pub fn new(calibration: f32, window: NonZeroUsize) -> Self {
        Self { calibration, window: SmoothingWindow::new(window) }
    }

    /// Converts one interval's pulses into the reported (smoothed, rounded) rate.
    pub fn convert(&mut self, pulses: u64) -> f32 {
        round_centi(self.window.push(raw_rate(pulses, self.calibration)))
    }

    pub async fn measure<P: Pause>(&mut self, counter: &PulseCounter, pause: &mut P) -> Result<f32, P::Error> {
        let pulses = sample(counter, pause, SAMPLE_INTERVAL).await?;
        let rate = self.convert(pulses);
        log::info!("{pulses} pulses in the last interval => {rate} L/min");
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    /// Fires a burst of pulses while "sleeping".
    struct Burst<'c> {
        counter: &'c PulseCounter,
        pulses: u64,
        slept: Vec<Duration>,
    }

    impl Pause for Burst<'_> {
        type Error = ();
        async fn pause(&mut self, duration: Duration) -> Result<(), ()> {
            for _ in 0..self.pulses {
                self.counter.increment();
            }
            self.slept.push(duration);
            Ok(())
        }
    }

    fn window(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn fifteen_pulses_at_default_calibration_is_two_litres() {
        assert_eq!(flow_rate(15, 7.5), 2.0);
    }

    #[test]
    fn rate_is_pulses_over_calibration_to_two_decimals() {
        for pulses in 0..500 {
            let expected = (pulses as f32 / 7.5 * 100.0).round() / 100.0;
            assert_eq!(flow_rate(pulses, 7.5), expected);
        }
        assert_eq!(flow_rate(1, 7.5), 0.13);
        assert_eq!(flow_rate(0, 7.5), 0.0);
        assert_eq!(flow_rate(100, 450.0), 0.22);
    }

    #[test]
    fn sample_counts_only_pulses_during_the_interval() {
        let counter = PulseCounter::new();
        for _ in 0..40 {
            counter.increment();
        }
        let mut pause = Burst { counter: &counter, pulses: 15, slept: Vec::new() };
        let pulses = block_on(sample(&counter, &mut pause, SAMPLE_INTERVAL)).unwrap();
        assert_eq!(pulses, 15);
        assert_eq!(pause.slept, [SAMPLE_INTERVAL]);
    }

    #[test]
    fn measure_smooths_raw_rates() {
        let counter = PulseCounter::new();
        let mut meter = FlowMeter::new(7.5, window(5));
        let mut rate = 0.0;
        for pulses in [15, 15, 15, 15, 30] {
            let mut pause = Burst { counter: &counter, pulses, slept: Vec::new() };
            rate = block_on(meter.measure(&counter, &mut pause)).unwrap();
        }
        assert_eq!(rate, 2.4);
    }

    #[test]
    fn window_of_one_reports_raw_rate() {
        let mut meter = FlowMeter::new(7.5, window(1));
        assert_eq!(meter.convert(15), 2.0);
        assert_eq!(meter.convert(30), 4.0);
    }
}
