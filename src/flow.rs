use core::{
    convert::Infallible,
    fmt::Debug,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

/// Monotonic pulse count fed by the edge detector and read by the sampler.
#[derive(Debug, Default)]
pub struct PulseCounter {
    pulses: AtomicU64,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self { pulses: AtomicU64::new(0) }
    }

    pub fn increment(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    /// Pulses counted since an earlier snapshot.
    pub fn since(&self, start: u64) -> u64 {
        // NOTE: Wrapping keeps the difference sane even if the counter ever overflows.
        self.snapshot().wrapping_sub(start)
    }
}

/// Which transitions count as one pulse. The two policies do not agree on the same
/// physical flow, so a deployment must pick one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    /// Every rising edge is a pulse.
    Rising,
    /// Subscribe to both edges but only count those that leave the line low.
    FallingLow,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown edge policy `{0}` (expected `rising` or `falling-low`)")]
pub struct UnknownEdge(String);

impl FromStr for Edge {
    type Err = UnknownEdge;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rising" => Ok(Self::Rising),
            "falling-low" | "falling" => Ok(Self::FallingLow),
            other => Err(UnknownEdge(other.into())),
        }
    }
}

/// The slice of a GPIO input driver that the detector needs.
#[allow(async_fn_in_trait)]
pub trait PulseInput {
    type Error;
    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error>;
    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error>;
    fn is_low(&self) -> bool;
}

#[cfg(target_os = "espidf")]
mod driver {
    use esp_idf_hal::gpio::{Input, InputPin, PinDriver};
    use esp_idf_sys::EspError;

    impl<T: InputPin> super::PulseInput for PinDriver<'_, T, Input> {
        type Error = EspError;
        async fn wait_for_rising_edge(&mut self) -> Result<(), EspError> {
            PinDriver::wait_for_rising_edge(self).await
        }
        async fn wait_for_any_edge(&mut self) -> Result<(), EspError> {
            PinDriver::wait_for_any_edge(self).await
        }
        fn is_low(&self) -> bool {
            PinDriver::is_low(self)
        }
    }
}

/// Consecutive failed edge waits after which the line is considered lost.
pub const REARM_ATTEMPTS: u32 = 3;

/// Infinitely counts the qualifying edges of a pin. A failed wait re-arms the edge
/// subscription; only `REARM_ATTEMPTS` failures in a row end detection.
pub async fn detect<P>(pin: &mut P, edge: Edge, counter: &PulseCounter) -> Result<Infallible, P::Error>
where
    P: PulseInput,
    P::Error: Debug,
{
    let mut failures = 0;
    loop {
        let waited = match edge {
            Edge::Rising => pin.wait_for_rising_edge().await.map(|()| true),
            Edge::FallingLow => pin.wait_for_any_edge().await.map(|()| pin.is_low()),
        };
        match waited {
            Ok(pulse) => {
                failures = 0;
                if pulse {
                    log::debug!("flow sensor pulse detected");
                    counter.increment();
                }
            }
            Err(err) => {
                failures += 1;
                if failures >= REARM_ATTEMPTS {
                    return Err(err);
                }
                log::warn!("flow sensor wait failed ({failures}/{REARM_ATTEMPTS}), re-arming: {err:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, sync::Arc, thread};

    /// Replays a fixed list of line levels, one per edge, then fails.
    struct ScriptedPin {
        levels: VecDeque<bool>,
        level: bool,
        rising_waits: usize,
        any_waits: usize,
    }

    impl ScriptedPin {
        fn new(levels: &[bool]) -> Self {
            Self { levels: levels.iter().copied().collect(), level: false, rising_waits: 0, any_waits: 0 }
        }
    }

    impl PulseInput for ScriptedPin {
        type Error = &'static str;
        async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
            self.rising_waits += 1;
            loop {
                match self.levels.pop_front() {
                    Some(high) => {
                        let rose = high && !self.level;
                        self.level = high;
                        if rose {
                            return Ok(());
                        }
                    }
                    None => return Err("script exhausted"),
                }
            }
        }
        async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
            self.any_waits += 1;
            self.level = self.levels.pop_front().ok_or("script exhausted")?;
            Ok(())
        }
        fn is_low(&self) -> bool {
            !self.level
        }
    }

    fn count(edge: Edge, levels: &[bool]) -> (u64, ScriptedPin) {
        let counter = PulseCounter::new();
        let mut pin = ScriptedPin::new(levels);
        let result = futures::executor::block_on(detect(&mut pin, edge, &counter));
        assert_eq!(result, Err("script exhausted"));
        (counter.snapshot(), pin)
    }

    #[test]
    fn rising_policy_counts_low_to_high_transitions() {
        let (pulses, pin) = count(Edge::Rising, &[true, false, true, false, true]);
        assert_eq!(pulses, 3);
        assert_eq!(pin.any_waits, 0);
    }

    #[test]
    fn falling_low_policy_counts_only_low_levels() {
        let (pulses, pin) = count(Edge::FallingLow, &[true, false, true, false, true]);
        assert_eq!(pulses, 2);
        assert_eq!(pin.rising_waits, 0);
    }

    #[test]
    fn policies_disagree_on_the_same_waveform() {
        let waveform = [true, false, true];
        assert_ne!(count(Edge::Rising, &waveform).0, count(Edge::FallingLow, &waveform).0);
    }

    #[test]
    fn edge_policy_parses_from_config() {
        assert_eq!("rising".parse::<Edge>().unwrap(), Edge::Rising);
        assert_eq!(" Falling-Low ".parse::<Edge>().unwrap(), Edge::FallingLow);
        assert!("both".parse::<Edge>().is_err());
    }

    #[test]
    fn interval_difference_survives_concurrent_increments() {
        let counter = Arc::new(PulseCounter::new());
        let start = counter.snapshot();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment();
                    }
                })
            })
            .collect();
        let mut last = 0;
        while workers.iter().any(|w| !w.is_finished()) {
            let seen = counter.since(start);
            assert!(seen >= last);
            last = seen;
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(counter.since(start), 4000);
    }

    #[test]
    fn a_failed_wait_rearms_without_losing_the_count() {
        struct Glitchy {
            script: VecDeque<Result<bool, &'static str>>,
            level: bool,
        }

        impl PulseInput for Glitchy {
            type Error = &'static str;
            async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
                unreachable!("falling-low never waits for rising edges")
            }
            async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
                self.level = self.script.pop_front().unwrap_or(Err("line lost"))?;
                Ok(())
            }
            fn is_low(&self) -> bool {
                !self.level
            }
        }

        let counter = PulseCounter::new();
        let mut pin = Glitchy {
            script: [Ok(false), Err("glitch"), Ok(true), Ok(false), Err("glitch"), Err("glitch"), Ok(false)].into(),
            level: true,
        };
        let result = futures::executor::block_on(detect(&mut pin, Edge::FallingLow, &counter));
        assert_eq!(result, Err("line lost"));
        assert_eq!(counter.snapshot(), 3);
    }

    #[test]
    fn repeated_failures_end_detection() {
        let (pulses, pin) = count(Edge::Rising, &[]);
        assert_eq!(pulses, 0);
        assert_eq!(pin.rising_waits, REARM_ATTEMPTS as usize);
    }
}
