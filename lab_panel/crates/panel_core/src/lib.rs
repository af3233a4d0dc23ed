pub mod modules {
    pub mod config;
    pub mod connection;
    pub mod dispatcher;
    pub mod error;
    pub mod events;
    pub mod format;
    pub mod gates;
    pub mod history;
    pub mod protocol;
    pub mod router;
    pub mod session;
    pub mod store;
    pub mod ws_actor;
}

pub use modules::{
    config, connection, dispatcher, error, events, format, gates, history, protocol, router,
    session, store, ws_actor,
};
