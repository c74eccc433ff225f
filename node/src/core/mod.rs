pub(crate) mod context;
pub(crate) mod node;
pub(crate) mod shutdown;

pub use context::NodeContext;
pub use node::{Node, NodeError, NodeHandle};
pub use shutdown::Handle;
