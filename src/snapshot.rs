use core::{fmt::Debug, pin::pin, time::Duration};

use chrono::Utc;
use futures::future::{select, Either};

use crate::{
    button::Shutdown,
    flow::{self, Edge, PulseCounter, PulseInput},
    meter::{FlowMeter, Pause},
    reading::{Reading, Tags},
    server::Latest,
    transmit::Transmit,
};

/// How long to wait after a cycle, depending on whether the reading got through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    pub cycle_pause: Duration,
    pub retry_delay: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        // One second of sampling plus four of rest makes a five-second cycle.
        Self { cycle_pause: Duration::from_secs(4), retry_delay: Duration::from_secs(5) }
    }
}

/// Everything the report loop needs besides the pulse counter.
pub struct Pipeline<'a, S, P> {
    pub meter: FlowMeter,
    pub sink: S,
    pub pause: P,
    pub schedule: Schedule,
    pub tags: Tags,
    pub compat: bool,
    pub latest: &'a Latest,
    pub shutdown: &'a Shutdown,
}

/// Rests for `duration`. A timer failure only shortens the rest.
async fn rest<P: Pause>(pause: &mut P, duration: Duration)
where
    P::Error: Debug,
{
    if let Err(err) = pause.pause(duration).await {
        log::warn!("timer failed while resting for {duration:?}: {err:?}");
    }
}

/// Samples, transmits and rests until a shutdown is requested. Any failure inside a
/// cycle drops that cycle's reading and waits the retry delay; sampling never stops.
pub async fn report<S, P>(pipeline: &mut Pipeline<'_, S, P>, counter: &PulseCounter)
where
    S: Transmit,
    P: Pause,
    P::Error: Debug,
{
    let Pipeline { meter, sink, pause, schedule, tags, compat, latest, shutdown } = pipeline;
    while !shutdown.is_requested() {
        let rate = match meter.measure(counter, pause).await {
            Ok(rate) => rate,
            Err(err) => {
                log::warn!("sampling failed, skipping this cycle: {err:?}");
                rest(pause, schedule.retry_delay).await;
                continue;
            }
        };
        let reading = Reading::new(rate, Utc::now(), tags, *compat);
        latest.record(&reading);

        let delay = match sink.send(&reading).await {
            Ok(()) => {
                log::info!("reported {rate} L/min");
                schedule.cycle_pause
            }
            Err(err) => {
                log::warn!("dropped reading of {rate} L/min: {err}");
                schedule.retry_delay
            }
        };
        rest(pause, delay).await;
    }
    log::info!("report loop stopped");
}

/// Counts pulses and reports them until shutdown. The pin is owned here so that it is
/// released exactly once, whichever way the pipeline ends. Only losing the sensor line
/// ends it early.
pub async fn run<I, S, P>(mut pin: I, edge: Edge, counter: &PulseCounter, mut pipeline: Pipeline<'_, S, P>) -> Result<(), I::Error>
where
    I: PulseInput,
    I::Error: Debug,
    S: Transmit,
    P: Pause,
    P::Error: Debug,
{
    log::info!("counting {edge:?} edges");
    let outcome = {
        let detect = pin!(flow::detect(&mut pin, edge, counter));
        let report = pin!(report(&mut pipeline, counter));
        match select(detect, report).await {
            Either::Left((Ok(never), _)) => match never {},
            Either::Left((Err(err), _)) => Err(err),
            Either::Right(((), _)) => Ok(()),
        }
    };
    drop(pin);
    log::info!("flow sensor released");
    outcome
}
