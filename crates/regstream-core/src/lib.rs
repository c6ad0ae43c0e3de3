mod context;
mod error;
mod gpu;
mod reflection;
mod registers;
mod shader;
mod stream;

pub use context::*;
pub use error::*;
pub use gpu::*;
pub use reflection::*;
pub use registers::*;
pub use shader::*;
pub use stream::*;

use smallvec::SmallVec;
pub type RVec<T> = SmallVec<[T; 4]>;

#[macro_export]
macro_rules! rvec {
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::RVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ rvec![@one $x])*;
        #[allow(unused_mut)]
        let mut vec = $crate::RVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::RVec::from_vec(vec![$($x,)*])
        }
    });
}
