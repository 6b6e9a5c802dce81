// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A fixed-point PID transfer function.
//!
//! One call to [`control`] advances the loop one sample period: the caller
//! reads its sensor, passes the reading with the target and the previous
//! actuator output, and gets the next output back. The sample period is the
//! unit of time, so the function must be called on a consistently periodic
//! basis - typically from a [`Mux`]-driven loop feeding a
//! [`Modulator`](crate::modulator::Modulator).
//!
//! All arithmetic is integer: gains are numerator/denominator ratios applied
//! with 64-bit intermediates, so the controller behaves identically on every
//! target and never touches floating point.
//!
//! Derivative is computed **on the measurement**, not the error, which
//! avoids the output kick when the target steps. The integral accumulates
//! post-gain and is clamped to `±windup`. The final delta is scaled by `kc`
//! and added to the previous output, which is clamped to `[minimum,
//! maximum]` and then snapped out of the deadbands: outputs strictly inside
//! `(minimum, lower)` fall to `minimum`, and strictly inside `(upper,
//! maximum)` rise to `maximum`, to accommodate actuators that misbehave
//! near their extremes.
//!
//! [`Mux`]: crate::mux::Mux

/// Sensor sample type.
pub type Input = i16;

/// Actuator output type.
pub type Output = i16;

/// Internal accumulator type.
pub type Value = i32;

/// The most positive accumulator value; also the result of a gain whose
/// denominator is zero.
pub const MAXIMUM_VALUE: Value = Value::MAX;

/// The extreme actuator outputs.
pub const MINIMUM_OUTPUT: Output = Output::MIN;
pub const MAXIMUM_OUTPUT: Output = Output::MAX;

/// A gain (or loss) expressed as an integer ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gain {
    pub numerator: i16,
    pub denominator: i16,
}

impl Gain {
    #[must_use]
    pub const fn new(numerator: i16, denominator: i16) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Passes values through unchanged.
    pub const UNITY: Self = Self::new(1, 1);

    /// Zeroes values out (disables the term).
    pub const ZERO: Self = Self::new(0, 1);
}

/// Applies `gain` to `value` with widened intermediates.
///
/// A zero denominator saturates to [`MAXIMUM_VALUE`]; a zero numerator
/// yields zero; a unity ratio passes `value` through.
#[must_use]
pub fn gain(value: Value, gain: Gain) -> Value {
    if gain.denominator == 0 {
        MAXIMUM_VALUE
    } else if gain.numerator == 0 {
        0
    } else if gain.numerator == gain.denominator {
        value
    } else {
        let wide = i64::from(value) * i64::from(gain.numerator) / i64::from(gain.denominator);
        wide.clamp(i64::from(Value::MIN), i64::from(Value::MAX)) as Value
    }
}

/// Tuning for one control loop. A value type: share and copy freely; the
/// same parameters can drive any number of [`State`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    /// Magnitude bound on the integral accumulator.
    pub windup: Value,
    /// Hard output clamp.
    pub minimum: Output,
    pub maximum: Output,
    /// Deadband edges: see the [module docs](self).
    pub lower: Output,
    pub upper: Output,
    pub kp: Gain,
    pub ki: Gain,
    pub kd: Gain,
    /// Scales the summed delta; `{0, _}` disables the controller entirely.
    pub kc: Gain,
    /// Low-pass filter the sample (running two-point average).
    pub filter: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            windup: MAXIMUM_VALUE,
            minimum: MINIMUM_OUTPUT,
            maximum: MAXIMUM_OUTPUT,
            lower: MINIMUM_OUTPUT,
            upper: MAXIMUM_OUTPUT,
            kp: Gain::UNITY,
            ki: Gain::UNITY,
            kd: Gain::UNITY,
            kc: Gain::UNITY,
            filter: true,
        }
    }
}

/// The evolving state of one control loop. Default-construct to start;
/// every field is observable for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    pub sample: Value,
    pub proportional: Value,
    pub integral: Value,
    pub differential: Value,
    pub total: Value,
    pub delta: Value,
    pub previous: Value,
    pub initialized: bool,
}

impl State {
    /// Restarts the transfer function from the beginning of time: the next
    /// [`control`] call re-seeds from its input.
    pub fn reset(&mut self) { self.initialized = false; }
}

/// Advances the loop one sample period. See the [module docs](self).
#[must_use]
pub fn control(
    parameters: &Parameters,
    state: &mut State,
    target: Input,
    input: Input,
    output: Output,
) -> Output {
    if !state.initialized {
        state.integral = 0;
        state.previous = Value::from(input);
        state.sample = Value::from(input);
        state.initialized = true;
    }

    if parameters.filter {
        state.sample += Value::from(input);
        state.sample >>= 1;
    } else {
        state.sample = Value::from(input);
    }

    state.proportional = Value::from(target) - state.sample;
    state.total = gain(state.proportional, parameters.kp);

    // Sum the integral post-gain so changing ki mid-flight does not rescale
    // history.
    state.integral = state
        .integral
        .saturating_add(gain(state.proportional, parameters.ki));
    if state.integral > parameters.windup {
        state.integral = parameters.windup;
    } else if state.integral < -parameters.windup {
        state.integral = -parameters.windup;
    }
    state.total = state.total.saturating_add(state.integral);

    state.differential = state.sample - state.previous;
    state.total = state.total.saturating_sub(gain(state.differential, parameters.kd));
    state.previous = state.sample;

    // Scale the sum, not the terms: scaling each term could round all of
    // them to zero while their sum would not be.
    state.delta = gain(state.total, parameters.kc);

    let next = i64::from(output) + i64::from(state.delta);
    let mut next = next.clamp(
        i64::from(parameters.minimum),
        i64::from(parameters.maximum),
    ) as Output;

    if parameters.minimum < next && next < parameters.lower {
        next = parameters.minimum;
    } else if parameters.upper < next && next < parameters.maximum {
        next = parameters.maximum;
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn loop_parameters() -> Parameters {
        Parameters {
            windup: 1_000,
            minimum: 0,
            maximum: 100,
            lower: 0,
            upper: 100,
            kp: Gain::UNITY,
            ki: Gain::new(1, 4),
            kd: Gain::UNITY,
            kc: Gain::UNITY,
            filter: false,
        }
    }

    #[test]
    fn test_defaults() {
        let parameters = Parameters::default();
        assert_eq!(parameters.windup, MAXIMUM_VALUE);
        assert_eq!(parameters.minimum, MINIMUM_OUTPUT);
        assert_eq!(parameters.maximum, MAXIMUM_OUTPUT);
        assert_eq!(parameters.lower, MINIMUM_OUTPUT);
        assert_eq!(parameters.upper, MAXIMUM_OUTPUT);
        assert_eq!(parameters.kp, Gain::UNITY);
        assert!(parameters.filter);
        assert_eq!(State::default(), State {
            sample: 0,
            proportional: 0,
            integral: 0,
            differential: 0,
            total: 0,
            delta: 0,
            previous: 0,
            initialized: false,
        });
    }

    #[test]
    fn test_gain_special_cases() {
        assert_eq!(gain(7, Gain::new(1, 0)), MAXIMUM_VALUE);
        assert_eq!(gain(-7, Gain::new(1, 0)), MAXIMUM_VALUE);
        assert_eq!(gain(7, Gain::ZERO), 0);
        assert_eq!(gain(7, Gain::new(3, 3)), 7);
        assert_eq!(gain(7, Gain::new(2, 1)), 14);
        assert_eq!(gain(7, Gain::new(1, 2)), 3);
        assert_eq!(gain(-7, Gain::new(1, 2)), -3); // Truncation toward zero.
        assert_eq!(gain(100, Gain::new(3, 4)), 75);
    }

    #[test]
    fn test_gain_widening_does_not_overflow() {
        assert_eq!(
            gain(MAXIMUM_VALUE, Gain::new(i16::MAX, 1)),
            MAXIMUM_VALUE // Saturated, not wrapped.
        );
        assert_eq!(
            gain(Value::MIN, Gain::new(i16::MAX, 1)),
            Value::MIN
        );
    }

    #[test]
    fn test_first_call_seeds_from_the_input() {
        let parameters = loop_parameters();
        let mut state = State::default();
        let _ = control(&parameters, &mut state, 50, 30, 0);
        assert!(state.initialized);
        assert_eq!(state.previous, 30);
        // P = 50 - 30 = 20 on the seeded sample, no derivative on first call.
        assert_eq!(state.proportional, 20);
        assert_eq!(state.differential, 0);
    }

    #[test]
    fn test_reset_restarts_the_transfer_function() {
        let parameters = loop_parameters();
        let mut state = State::default();
        let _ = control(&parameters, &mut state, 50, 0, 0);
        let _ = control(&parameters, &mut state, 50, 10, 0);
        assert_ne!(state.integral, 0);
        state.reset();
        let _ = control(&parameters, &mut state, 50, 40, 0);
        // Reseeded: integral restarted from zero plus one fresh term.
        assert_eq!(state.integral, gain(10, Gain::new(1, 4)));
        assert_eq!(state.previous, 40);
    }

    #[test]
    fn test_zero_kc_leaves_output_at_clamped_previous() {
        let mut parameters = loop_parameters();
        parameters.kc = Gain::ZERO;
        let mut state = State::default();
        assert_eq!(control(&parameters, &mut state, 50, 0, 42), 42);
        assert_eq!(control(&parameters, &mut state, 50, 0, 200), 100); // Clamped.
        assert_eq!(control(&parameters, &mut state, 50, 0, -5), 0); // Clamped.
    }

    #[test]
    fn test_windup_clamps_the_integral() {
        let mut parameters = loop_parameters();
        parameters.windup = 10;
        let mut state = State::default();
        for _ in 0..100 {
            let _ = control(&parameters, &mut state, 100, 0, 0);
        }
        assert_eq!(state.integral, 10);
        for _ in 0..100 {
            let _ = control(&parameters, &mut state, -100, 0, 0);
        }
        assert_eq!(state.integral, -10);
    }

    #[test]
    fn test_deadbands_snap_to_the_rails() {
        let mut parameters = loop_parameters();
        parameters.lower = 10;
        parameters.upper = 90;
        parameters.kc = Gain::ZERO; // Output is just the clamped previous.
        let mut state = State::default();
        assert_eq!(control(&parameters, &mut state, 0, 0, 5), 0); // (0, 10) -> 0
        assert_eq!(control(&parameters, &mut state, 0, 0, 10), 10); // Edge stays.
        assert_eq!(control(&parameters, &mut state, 0, 0, 95), 100); // (90, 100) -> 100
        assert_eq!(control(&parameters, &mut state, 0, 0, 90), 90); // Edge stays.
    }

    #[test]
    fn test_low_pass_filter_averages_samples() {
        let mut parameters = loop_parameters();
        parameters.filter = true;
        let mut state = State::default();
        let _ = control(&parameters, &mut state, 0, 100, 0);
        // Seeded at 100, then (100 + 100) / 2.
        assert_eq!(state.sample, 100);
        let _ = control(&parameters, &mut state, 0, 0, 0);
        assert_eq!(state.sample, 50);
        let _ = control(&parameters, &mut state, 0, 0, 0);
        assert_eq!(state.sample, 25);
    }
}
