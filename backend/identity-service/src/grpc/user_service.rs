//! `userservice.UserService` client
//!
//! ```proto
//! service UserService {
//!   rpc GetUserByEmail(GetUserByEmailRequest) returns (GetUserResponse);
//! }
//! ```

use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;

const GET_USER_BY_EMAIL_PATH: &str = "/userservice.UserService/GetUserByEmail";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetUserByEmailRequest {
    #[prost(string, tag = "1")]
    pub email: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetUserResponse {
    #[prost(enumeration = "GetUserResponseStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub user_id: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "3")]
    pub name: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "4")]
    pub username: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum GetUserResponseStatus {
    Unspecified = 0,
    Success = 1,
    NotFound = 2,
    Failed = 3,
}

/// Unary client over a shared tonic channel
#[derive(Debug, Clone)]
pub struct UserServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl UserServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn get_user_by_email(
        &mut self,
        request: impl tonic::IntoRequest<GetUserByEmailRequest>,
    ) -> Result<tonic::Response<GetUserResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {}", e)))?;
        let codec: ProstCodec<GetUserByEmailRequest, GetUserResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(GET_USER_BY_EMAIL_PATH);
        self.inner.unary(request.into_request(), path, codec).await
    }
}
