// ── Local replica storage ──

pub(crate) mod collection;
mod repository;

pub use repository::DeviceRepository;
