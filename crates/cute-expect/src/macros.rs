//! Test-authoring macros.
//!
//! Parameters and symbols are plain identifiers; their names are what the
//! mock engine matches on.

/// Source location of the invocation site.
#[macro_export]
macro_rules! here {
    () => {
        $crate::Location {
            file: ::core::file!(),
            line: ::core::line!(),
            function: ::core::module_path!(),
        }
    };
}

/// Non-fatal boolean check; evaluates to whether it held.
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::bridge::check($cond, ::core::stringify!($cond), $crate::here!())
    };
}

/// Fatal boolean check.
#[macro_export]
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        $crate::bridge::ensure($cond, ::core::stringify!($cond), $crate::here!())
    };
}

/// Non-fatal comparison: `check_that!(len, in_range(1, 8))`.
#[macro_export]
macro_rules! check_that {
    ($actual:expr, $op:ident ( $($arg:expr),* $(,)? )) => {
        $crate::bridge::check_that(
            $actual,
            ::core::stringify!($actual),
            &$crate::Constraint::$op($($arg),*).with_expr(::core::stringify!($($arg),*)),
            $crate::here!(),
        )
    };
}

/// Fatal comparison: `ensure_that!(name, begin("tmp"))`.
#[macro_export]
macro_rules! ensure_that {
    ($actual:expr, $op:ident ( $($arg:expr),* $(,)? )) => {
        $crate::bridge::ensure_that(
            $actual,
            ::core::stringify!($actual),
            &$crate::Constraint::$op($($arg),*).with_expr(::core::stringify!($($arg),*)),
            $crate::here!(),
        )
    };
}

/// Fail the test now, with an optional formatted reason.
#[macro_export]
macro_rules! fail {
    () => {
        $crate::bridge::fail(::core::option::Option::None, $crate::here!())
    };
    ($($fmt:tt)+) => {
        $crate::bridge::fail(
            ::core::option::Option::Some(::std::format!($($fmt)+)),
            $crate::here!(),
        )
    };
}

/// Skip the test now, with an optional formatted reason.
#[macro_export]
macro_rules! skip {
    () => {
        $crate::bridge::skip(::core::option::Option::None, $crate::here!())
    };
    ($($fmt:tt)+) => {
        $crate::bridge::skip(
            ::core::option::Option::Some(::std::format!($($fmt)+)),
            $crate::here!(),
        )
    };
}

/// Declare an expected call:
/// `expect_call!(write, fd: equal(1), len: in_range(1, 8) => 4)`.
#[macro_export]
macro_rules! expect_call {
    ($callee:ident $(, $parm:ident : $op:ident ( $($arg:expr),* ))* $(=> $ret:expr)?) => {
        $crate::expect::push(
            $crate::expect::Expectation::call(::core::stringify!($callee))
                $(.parm(
                    ::core::stringify!($parm),
                    $crate::Constraint::$op($($arg),*).with_expr(::core::stringify!($($arg),*)),
                ))*
                $(.returns($ret))?,
            $crate::here!(),
        )
    };
}

/// Intercept a call inside a mock, yielding a [`MockCall`](crate::MockCall).
#[macro_export]
macro_rules! mock_call {
    ($callee:ident) => {
        $crate::expect::intercept(::core::stringify!($callee), $crate::here!())
    };
}

/// Supply a parameter of an intercepted call for checking.
#[macro_export]
macro_rules! mock_parm {
    ($call:ident, $parm:ident) => {
        $call.check_parameter(::core::stringify!($parm), $parm, $crate::here!())
    };
}

/// Whole mock body: intercept, check each listed parameter, then either
/// finish or return the injected value as `$ty`.
///
/// ```ignore
/// fn write(fd: i32, len: usize) -> isize {
///     cute_expect::mock!(write, fd, len => isize)
/// }
/// ```
#[macro_export]
macro_rules! mock {
    ($callee:ident $(, $parm:ident)* => $ty:ty) => {{
        #[allow(unused_mut)]
        let mut call = $crate::expect::intercept(::core::stringify!($callee), $crate::here!());
        $( call.check_parameter(::core::stringify!($parm), $parm, $crate::here!()); )*
        call.retval::<$ty>($crate::here!())
    }};
    ($callee:ident $(, $parm:ident)*) => {{
        #[allow(unused_mut)]
        let mut call = $crate::expect::intercept(::core::stringify!($callee), $crate::here!());
        $( call.check_parameter(::core::stringify!($parm), $parm, $crate::here!()); )*
        call.finish($crate::here!())
    }};
}
