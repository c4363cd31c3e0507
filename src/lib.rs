pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod link;
pub mod test_util;
pub mod transport;
pub mod util;
pub mod video;

pub use config::LinkConfig;
pub use link::CarLink;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor(unsafe)]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
