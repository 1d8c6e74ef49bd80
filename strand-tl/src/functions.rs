//! RPC functions of the service schema.

use crate::{enums, types};

tl_function! {
    /// Opens the key exchange; the server answers with its `pq` challenge.
    #[tl(id = 0xbe7e8ef1, name = "req_pq_multi", returns = types::ResPq)]
    pub struct ReqPqMulti {
        pub nonce: [u8; 16],
    }
}

tl_function! {
    #[tl(id = 0xd712e4be, name = "req_DH_params", returns = enums::ServerDhParams)]
    pub struct ReqDhParams {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub public_key_fingerprint: i64,
        pub encrypted_data: Vec<u8>,
    }
}

tl_function! {
    #[tl(id = 0xf5045f1f, name = "set_client_DH_params", returns = enums::SetClientDhParamsAnswer)]
    pub struct SetClientDhParams {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_data: Vec<u8>,
    }
}

tl_function! {
    #[tl(id = 0x7abe77ec, name = "ping", returns = types::Pong)]
    pub struct Ping {
        pub ping_id: i64,
    }
}

tl_function! {
    /// Like [`Ping`], but the server closes the connection if no further
    /// ping arrives within `disconnect_delay` seconds.
    #[tl(id = 0xf3427b8c, name = "ping_delay_disconnect", returns = types::Pong)]
    pub struct PingDelayDisconnect {
        pub ping_id: i64,
        pub disconnect_delay: i32,
    }
}

tl_function! {
    #[tl(id = 0xb921bd04, name = "get_future_salts", returns = types::FutureSalts)]
    pub struct GetFutureSalts {
        pub num: i32,
    }
}

tl_function! {
    #[tl(id = 0xe7512126, name = "destroy_session", returns = enums::DestroySessionRes)]
    pub struct DestroySession {
        pub session_id: i64,
    }
}
