mod cursor;
mod framer;

pub use cursor::StreamCursor;
