//! Hardware sweep for checking fan wiring by ear

use crate::actuator::ActuatorDriver;
use crate::curve::FanCommand;
use crate::errors::Result;
use log::info;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Ordered duty steps and how long to hold each
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub steps: Vec<(FanCommand, Duration)>,
}

impl SweepPlan {
    /// Hold 0/25/50/75/100% for `hold`, then ramp 100% down to 0% in steps of 10
    pub fn standard(hold: Duration, ramp_step: Duration) -> Self {
        let plateaus = [0, 25, 50, 75, 100].into_iter().map(|p| (FanCommand::clamped(p), hold));
        let ramp = (0..=10).rev().map(|i| (FanCommand::clamped(i * 10), ramp_step));
        Self {
            steps: plateaus.chain(ramp).collect(),
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|(_, hold)| *hold).sum()
    }
}

/// Whether the sweep ran to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    Interrupted,
}

/// Run `plan` on a fresh claim of `pin`. The output is shut down on every path.
pub async fn run_sweep(
    driver: &mut ActuatorDriver,
    pin: u8,
    frequency_hz: u32,
    plan: &SweepPlan,
    stop: impl Future<Output = ()>,
) -> Result<SweepOutcome> {
    tokio::pin!(stop);

    let result = sweep(driver, pin, frequency_hz, plan, &mut stop).await;
    driver.shutdown();

    match &result {
        Ok(SweepOutcome::Completed) => println!("Test complete - fan stopped"),
        Ok(SweepOutcome::Interrupted) => println!("Test interrupted - fan stopped"),
        Err(e) => println!("Test failed: {} - fan stopped", e),
    }
    result
}

async fn sweep<F: Future<Output = ()> + Unpin>(
    driver: &mut ActuatorDriver,
    pin: u8,
    frequency_hz: u32,
    plan: &SweepPlan,
    stop: &mut F,
) -> Result<SweepOutcome> {
    let ready = driver.initialize(pin, frequency_hz)?;
    println!(
        "Fan test on GPIO {} at {} Hz ({} output), about {}s",
        ready.pin,
        ready.frequency_hz,
        ready.kind,
        plan.total_duration().as_secs()
    );

    for (duty, hold) in &plan.steps {
        let applied = driver.set_duty(*duty)?;
        println!("Fan speed: {} - holding {:?}", applied, hold);
        info!("Sweep step {}", applied);

        tokio::select! {
            _ = sleep(*hold) => {}
            _ = &mut *stop => return Ok(SweepOutcome::Interrupted),
        }
    }
    Ok(SweepOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedPwm;

    #[test]
    fn test_standard_plan_shape() {
        let plan = SweepPlan::standard(Duration::from_secs(3), Duration::from_secs(1));
        let duties: Vec<u8> = plan.steps.iter().map(|(d, _)| d.percent()).collect();
        assert_eq!(
            duties,
            vec![0, 25, 50, 75, 100, 100, 90, 80, 70, 60, 50, 40, 30, 20, 10, 0]
        );
        assert_eq!(plan.total_duration(), Duration::from_secs(5 * 3 + 11));
    }

    #[tokio::test]
    async fn test_sweep_writes_every_step_then_releases() {
        let backend = SimulatedPwm::new();
        let probe = backend.probe();
        let mut driver = ActuatorDriver::with_settle(Box::new(backend), Duration::ZERO);
        let plan = SweepPlan::standard(Duration::from_millis(1), Duration::from_millis(1));

        let outcome = run_sweep(&mut driver, 18, 25_000, &plan, std::future::pending())
            .await
            .unwrap();

        assert_eq!(outcome, SweepOutcome::Completed);
        assert!(!driver.is_ready());
        let out = probe.lock().unwrap();
        // initialize writes 0, then one write per step, then the shutdown 0
        assert_eq!(out.writes.len(), 1 + plan.steps.len() + 1);
        assert_eq!(out.duty, 0);
        assert_eq!(out.claimed_pin, None);
    }

    #[tokio::test]
    async fn test_interrupted_sweep_still_stops_fan() {
        let backend = SimulatedPwm::new();
        let probe = backend.probe();
        let mut driver = ActuatorDriver::with_settle(Box::new(backend), Duration::ZERO);
        let plan = SweepPlan::standard(Duration::from_secs(60), Duration::from_secs(60));

        let outcome = run_sweep(&mut driver, 18, 25_000, &plan, std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(outcome, SweepOutcome::Interrupted);
        let out = probe.lock().unwrap();
        assert_eq!(out.duty, 0);
        assert!(!out.enabled);
    }
}
