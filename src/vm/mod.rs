//! The virtual machine contract seen by the code generator: tagged values,
//! interpreter frames, virtual operations and runtime helpers.

mod frame;
pub mod helpers;
pub mod layout;
mod op;
pub mod value;

pub use frame::{FrType, FrameReg, SLOT_SIZE, layout as frame_layout, param_offset};
pub use helpers::{Helper, HelperTable};
pub use op::{BinaryOp, CmpOp, Function, LabelId, Op, PutMode, UnaryOp};
pub use value::{DATA_MASK, DOUBLE_LIM, NUM_DATA_BITS, Tag, VALUE_FORMAT_VERSION, Value};
