pub mod encoding;
pub mod headers;
pub mod method;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod serializer;
pub mod status;

pub use headers::Headers;
pub use method::Method;
pub use multipart::MultipartPart;
pub use request::Request;
pub use response::Response;
pub use status::StatusCode;
