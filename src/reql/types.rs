//! Query and response opcodes of the JSON wire protocol.

/// Term id of `DB`, used when splicing a default database into a query.
pub const TERM_DB: i64 = 14;

/// Query type, sent as the first element of the request array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start,
    Continue,
    Stop,
    NoreplyWait,
    ServerInfo,
}

impl QueryType {
    /// Wire opcode for this query type.
    pub fn code(self) -> i32 {
        match self {
            QueryType::Start => 1,
            QueryType::Continue => 2,
            QueryType::Stop => 3,
            QueryType::NoreplyWait => 4,
            QueryType::ServerInfo => 5,
        }
    }
}

/// Response type, the `t` field of every server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    SuccessFeed,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseType {
    /// Map a wire `t` code to a response type. Unknown codes return `None`
    /// and are reported as protocol errors by the caller.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ResponseType::SuccessAtom),
            2 => Some(ResponseType::SuccessSequence),
            3 => Some(ResponseType::SuccessPartial),
            4 => Some(ResponseType::WaitComplete),
            5 => Some(ResponseType::SuccessFeed),
            6 => Some(ResponseType::ServerInfo),
            16 => Some(ResponseType::ClientError),
            17 => Some(ResponseType::CompileError),
            18 => Some(ResponseType::RuntimeError),
            _ => None,
        }
    }

    /// Whether this response ends the query (no more frames will follow).
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseType::SuccessPartial | ResponseType::SuccessFeed)
    }

    /// Whether this response carries a server-side error.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_codes() {
        assert_eq!(QueryType::Start.code(), 1);
        assert_eq!(QueryType::Continue.code(), 2);
        assert_eq!(QueryType::Stop.code(), 3);
        assert_eq!(QueryType::NoreplyWait.code(), 4);
        assert_eq!(QueryType::ServerInfo.code(), 5);
    }

    #[test]
    fn response_type_codes() {
        assert_eq!(ResponseType::from_code(1), Some(ResponseType::SuccessAtom));
        assert_eq!(ResponseType::from_code(2), Some(ResponseType::SuccessSequence));
        assert_eq!(ResponseType::from_code(3), Some(ResponseType::SuccessPartial));
        assert_eq!(ResponseType::from_code(4), Some(ResponseType::WaitComplete));
        assert_eq!(ResponseType::from_code(5), Some(ResponseType::SuccessFeed));
        assert_eq!(ResponseType::from_code(6), Some(ResponseType::ServerInfo));
        assert_eq!(ResponseType::from_code(16), Some(ResponseType::ClientError));
        assert_eq!(ResponseType::from_code(17), Some(ResponseType::CompileError));
        assert_eq!(ResponseType::from_code(18), Some(ResponseType::RuntimeError));
        assert_eq!(ResponseType::from_code(7), None);
        assert_eq!(ResponseType::from_code(0), None);
    }

    #[test]
    fn partial_types_are_not_terminal() {
        assert!(!ResponseType::SuccessPartial.is_terminal());
        assert!(!ResponseType::SuccessFeed.is_terminal());
        assert!(ResponseType::SuccessSequence.is_terminal());
        assert!(ResponseType::SuccessAtom.is_terminal());
        assert!(ResponseType::RuntimeError.is_terminal());
    }
}
