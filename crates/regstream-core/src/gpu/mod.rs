mod align;
mod buffer;
mod device;
#[cfg(any(test, feature = "testing"))]
mod mock;
mod retired;

pub use align::*;
pub use buffer::*;
pub use device::*;
#[cfg(any(test, feature = "testing"))]
pub use mock::*;
pub use retired::*;
