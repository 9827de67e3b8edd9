//! Build-time selectable invariant checks.
//!
//! The checks are compiled in for debug builds and for any build with the
//! `verify-barriers` feature. Otherwise [`verify!`] and [`verify_eq!`] keep their
//! arguments type-checked but never evaluate them, so both builds behave the
//! same apart from the assertions.

/// Whether this build carries the barrier verification checks.
pub const VERIFY_BARRIERS: bool = cfg!(any(debug_assertions, feature = "verify-barriers"));

/// Assert an invariant in verification builds.
macro_rules! verify {
    ($cond:expr $(,)?) => {
        if $crate::verify::VERIFY_BARRIERS {
            assert!($cond);
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if $crate::verify::VERIFY_BARRIERS {
            assert!($cond, $($arg)+);
        }
    };
}

/// Assert equality in verification builds.
macro_rules! verify_eq {
    ($left:expr, $right:expr $(,)?) => {
        if $crate::verify::VERIFY_BARRIERS {
            assert_eq!($left, $right);
        }
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        if $crate::verify::VERIFY_BARRIERS {
            assert_eq!($left, $right, $($arg)+);
        }
    };
}

pub(crate) use verify;
pub(crate) use verify_eq;
