use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Unknown session: {0}")]
    UnknownSession(uuid::Uuid),
}
