pub(crate) mod kv_app;

pub(crate) mod log_app;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod peer;
