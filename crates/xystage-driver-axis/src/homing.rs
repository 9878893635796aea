//! Coarse-to-fine limit-switch homing.
//!
//! Each pass drives every axis whose switch is still open toward the switch in
//! steps of `stepsize`, then zeroes the counters where both switches closed.
//! Between passes the stage backs off and re-approaches with a smaller step,
//! so the final origin sits within one fine step of the switch edge no matter
//! where the stage started.

use crate::controller::AxisController;
use tracing::instrument;
use xystage_core::{Axis, StageError, StageResult};

/// Limit register bit for X.
pub const X_LIMIT_MASK: i64 = 0x02;
/// Limit register bit for Y.
pub const Y_LIMIT_MASK: i64 = 0x08;

/// `(stepsize, back-off after the pass)`; the last pass has no back-off.
const PASSES: [(i64, Option<i64>); 3] = [(400, Some(200)), (40, Some(100)), (4, None)];

fn limit_mask(axis: Axis) -> i64 {
    match axis {
        Axis::X => X_LIMIT_MASK,
        Axis::Y => Y_LIMIT_MASK,
    }
}

impl AxisController {
    /// Home both axes against their limit switches.
    ///
    /// Safe to call from any starting position, including an already homed
    /// one. On success both position counters read zero at the switch edge.
    ///
    /// # Errors
    /// - [`StageError::HomingFailed`] if a pass travels further than the
    ///   configured `max_travel_steps` without both switches closing. Both
    ///   axes are stopped first.
    /// - Any exchange error from the underlying moves and queries.
    #[instrument(skip(self), fields(port = %self.port_name()), err)]
    pub async fn find_home(&mut self) -> StageResult<()> {
        self.set_homed(false);
        self.reset_home().await?;

        for (pass, (stepsize, backoff)) in PASSES.into_iter().enumerate() {
            let iterations = self.search_limits(stepsize).await?;
            self.reset_home().await?;
            tracing::info!(pass = pass + 1, stepsize, iterations, "Limit switches reached");

            if let Some(backoff) = backoff {
                self.go_to_position(backoff, backoff, true).await?;
                self.reset_home().await?;
            }
        }

        self.set_homed(true);
        tracing::info!("Stage homed");
        Ok(())
    }

    /// Step toward the switches until both report closed.
    ///
    /// Returns the number of step rounds taken.
    async fn search_limits(&mut self, stepsize: i64) -> StageResult<u32> {
        let cap = self.config().homing.max_travel_steps / stepsize + 1;
        let mut rounds: u32 = 0;

        loop {
            let limits = self.get_limits().await?;
            let pending: Vec<Axis> = Axis::ALL
                .into_iter()
                .filter(|axis| limits & limit_mask(*axis) == 0)
                .collect();
            if pending.is_empty() {
                return Ok(rounds);
            }

            if i64::from(rounds) >= cap {
                tracing::warn!(stepsize, rounds, limits, "Limit switch never closed");
                if let Err(e) = self.hard_stop().await {
                    tracing::warn!(error = %e, "Hard stop after failed homing pass also failed");
                }
                return Err(StageError::HomingFailed(format!(
                    "axes {:?} did not reach their limit switch within {} steps of {}",
                    pending, cap, stepsize
                )));
            }

            for &axis in &pending {
                self.move_relative(axis, -stepsize).await?;
            }
            for &axis in &pending {
                self.wait_while_active(axis).await?;
            }
            rounds += 1;
        }
    }
}
