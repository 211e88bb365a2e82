#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert {
    ( $condition:expr $( , $args:expr )* ) => {
        assert!($condition $( , $args )* )
    }
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert {
    ( $condition:expr $( , $args:expr )* ) => {
        if false {
            let _ = $condition;
            $( let _ = $args; )*
        }
    }
}

#[cfg(feature = "extra_assertions")]
macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $args:expr )* ) => {
        assert_eq!($left, $right $( , $args )* )
    }
}

#[cfg(not(feature = "extra_assertions"))]
macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $args:expr )* ) => {
        if false {
            let _ = $left;
            let _ = $right;
            $( let _ = $args; )*
        }
    }
}

/// Define a function that only does anything when the "extra_assertions"
/// feature is enabled.
///
/// When that feature is not enabled, then the function is a no-op that is
/// marked `#[inline(always)]` and should completely disappear in the final
/// compilation artifact. Generic parameters may carry a single trait bound.
macro_rules! extra_only {
    (
        $vis:vis fn $name:ident $(< $( $param:ident $( : $bound:path )? ),* $(,)? >)?
            ( $( $arg:ident : $arg_ty:ty ),* $(,)? )
        {
            $( $body:tt )*
        }
    ) => {
        #[cfg(feature = "extra_assertions")]
        $vis fn $name $(< $( $param $( : $bound )? ),* >)? ( $( $arg : $arg_ty ),* ) {
            $( $body )*
        }

        #[cfg(not(feature = "extra_assertions"))]
        #[inline(always)]
        #[allow(dead_code)]
        $vis fn $name $(< $( $param $( : $bound )? ),* >)? ( $( $arg : $arg_ty ),* ) {
            $( let _ = $arg; )*
        }
    }
}
