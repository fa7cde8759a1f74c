//! Function-pointer service tables.
//!
//! The subsystem calls back into its host kernel (scheduler, clock,
//! interrupt flags) through a table of plain function pointers registered
//! once at init. This keeps the dependency one-way: the host depends on the
//! subsystem crates, never the reverse, and the suites can swap in a fake
//! table.
//!
//! `define_service!` expands to the table struct, a `register_*` function
//! taking a `&'static` table, an `is_*_initialized` probe, an accessor, and
//! one inline wrapper per method:
//!
//! ```ignore
//! define_service! {
//!     runtime => RuntimeServices {
//!         clock_monotonic_ns() -> u64;
//!         block_current_task();
//!     }
//! }
//! // generates: register_runtime_services(), is_runtime_initialized(),
//! // runtime_services(), clock_monotonic_ns(), block_current_task()
//! ```
//!
//! Calling a wrapper before registration is a host integration bug; the
//! accessor panics with the service name rather than dereferencing null.

#[macro_export]
macro_rules! define_service {
    ($name:ident => $table:ident {
        $( $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) $( -> $ret:ty )? ; )*
    }) => {
        $crate::paste::paste! {
            pub struct $table {
                $( pub $method: fn( $( $ty ),* ) $( -> $ret )?, )*
            }

            static [<$name:upper _SERVICE_TABLE>]:
                core::sync::atomic::AtomicPtr<$table> =
                core::sync::atomic::AtomicPtr::new(core::ptr::null_mut());

            pub fn [<register_ $name _services>](table: &'static $table) {
                [<$name:upper _SERVICE_TABLE>].store(
                    table as *const $table as *mut $table,
                    core::sync::atomic::Ordering::Release,
                );
            }

            /// Drop the registration (shutdown and suite teardown).
            pub fn [<unregister_ $name _services>]() {
                [<$name:upper _SERVICE_TABLE>].store(
                    core::ptr::null_mut(),
                    core::sync::atomic::Ordering::Release,
                );
            }

            pub fn [<is_ $name _initialized>]() -> bool {
                ![<$name:upper _SERVICE_TABLE>]
                    .load(core::sync::atomic::Ordering::Acquire)
                    .is_null()
            }

            pub fn [<$name _services>]() -> &'static $table {
                let ptr = [<$name:upper _SERVICE_TABLE>]
                    .load(core::sync::atomic::Ordering::Acquire);
                if ptr.is_null() {
                    panic!(concat!(stringify!($name), " services not registered"));
                }
                // SAFETY: registration only stores `&'static` tables, so a
                // non-null pointer is valid for the program's lifetime.
                unsafe { &*ptr }
            }

            $(
                #[inline(always)]
                pub fn $method( $( $arg: $ty ),* ) $( -> $ret )? {
                    ([<$name _services>]().$method)( $( $arg ),* )
                }
            )*
        }
    };
}
