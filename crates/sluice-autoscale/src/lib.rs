//! sluice-autoscale — closed-loop pool scaling.
//!
//! Reads queue depth, processing-time, and utilization signals from the
//! metrics engine on a fixed tick and grows or shrinks the worker pool.
//!
//! # Scaling Algorithm
//!
//! ```text
//! up   = depth > scale_up_threshold
//!        OR utilization_1m > 75
//!        OR processing_time_1m > target
//! down = depth < scale_down_threshold
//!        AND utilization_1m < 40
//!        AND processing_time_1m < target
//!
//! up   → add_worker   (never cooldown-gated: bursts are absorbed fast)
//! down → remove_worker, only after the cooldown since the last scale
//!        event (contraction lags expansion to avoid flapping)
//! ```

pub mod scaler;

pub use scaler::{ScaleDecision, Scaler, ScalerConfig};
