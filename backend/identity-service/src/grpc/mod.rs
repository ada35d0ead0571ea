/// gRPC client bindings for the user service
///
/// Exports:
/// - `user_service`: `userservice.UserService` messages and client
pub mod user_service;

pub use user_service::{
    GetUserByEmailRequest, GetUserResponse, GetUserResponseStatus, UserServiceClient,
};
