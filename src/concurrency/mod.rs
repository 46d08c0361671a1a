mod guard;

pub(crate) use guard::concurrency_violation;
