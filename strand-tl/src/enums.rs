//! Boxed types with more than one constructor.

use crate::types;

tl_enum! {
    /// Answer to `req_DH_params`.
    pub enum ServerDhParams {
        Fail(types::ServerDhParamsFail),
        Ok(types::ServerDhParamsOk),
    }
}

tl_enum! {
    /// Answer to `set_client_DH_params`.
    pub enum SetClientDhParamsAnswer {
        DhGenOk(types::DhGenOk),
        DhGenRetry(types::DhGenRetry),
        DhGenFail(types::DhGenFail),
    }
}

tl_enum! {
    pub enum BadMsgNotification {
        Notification(types::BadMsgNotification),
        ServerSalt(types::BadServerSalt),
    }
}

tl_enum! {
    pub enum MsgDetailedInfo {
        Info(types::MsgDetailedInfo),
        New(types::MsgNewDetailedInfo),
    }
}

tl_enum! {
    pub enum DestroySessionRes {
        Ok(types::DestroySessionOk),
        None(types::DestroySessionNone),
    }
}
