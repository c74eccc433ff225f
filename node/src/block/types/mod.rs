pub(crate) mod block;
pub(crate) mod contender;
pub(crate) mod transaction;
