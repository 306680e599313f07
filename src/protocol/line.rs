/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::protocol::UNORDERED_MESSAGES;
use crate::utils::{SessionError, decode_text, parse_arguments};
use std::str::FromStr;

/// Bandwidth limit the server applies to the session, as reported by `CONS`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RealBandwidth {
    Unlimited,
    Unmanaged,
    Limited(f64),
}

/// Frequency limit reported by `CONF`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MaxFrequency {
    Unlimited,
    Limited(f64),
}

/// One inbound protocol line, already split and decoded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ServerLine {
    Update {
        sub_id: u32,
        item: usize,
        values: String,
    },
    ReqOk {
        req_id: Option<u64>,
    },
    ReqErr {
        req_id: u64,
        code: i32,
        message: String,
    },
    Probe,
    Loop {
        delay_ms: u64,
    },
    ConOk {
        session_id: String,
        request_limit: usize,
        keepalive_ms: u64,
        control_link: Option<String>,
    },
    WsOk,
    ServName(String),
    ClientIp(String),
    Cons(RealBandwidth),
    MsgDone {
        sequence: String,
        prog: u64,
        response: String,
    },
    MsgFail {
        sequence: String,
        prog: u64,
        code: i32,
        message: String,
    },
    Prog(u64),
    SubOk {
        sub_id: u32,
        items: usize,
        fields: usize,
    },
    SubCmd {
        sub_id: u32,
        items: usize,
        fields: usize,
        key_idx: usize,
        cmd_idx: usize,
    },
    Unsub {
        sub_id: u32,
    },
    Conf {
        sub_id: u32,
        frequency: MaxFrequency,
    },
    Eos {
        sub_id: u32,
        item: usize,
    },
    Cs {
        sub_id: u32,
        item: usize,
    },
    Ov {
        sub_id: u32,
        item: usize,
        lost: u32,
    },
    Noop,
    ConErr {
        code: i32,
        message: String,
    },
    End {
        code: i32,
        message: String,
    },
    Error {
        code: i32,
        message: String,
    },
    Sync {
        seconds: u64,
    },
    MpnReg {
        device_id: String,
        adapter_name: String,
    },
    MpnZero {
        device_id: String,
    },
    MpnOk {
        sub_id: u32,
        mpn_sub_id: String,
    },
    MpnDel {
        mpn_sub_id: String,
    },
    MpnConf {
        mpn_sub_id: String,
    },
}

fn fields(line: &str, n: usize) -> Result<Vec<&str>, SessionError> {
    let args: Vec<&str> = line.splitn(n, ',').collect();
    if args.len() < n {
        return Err(SessionError::Parse(line.to_string()));
    }
    Ok(args)
}

fn num<T: FromStr>(line: &str, value: &str) -> Result<T, SessionError> {
    value
        .parse::<T>()
        .map_err(|_| SessionError::Parse(line.to_string()))
}

fn sequence_name(raw: &str) -> String {
    if raw == "*" {
        UNORDERED_MESSAGES.to_string()
    } else {
        decode_text(raw)
    }
}

impl ServerLine {
    /// Parses one line (without its terminator).
    pub(crate) fn parse(line: &str) -> Result<ServerLine, SessionError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let tag = line.split(',').next().unwrap_or_default();
        let parsed = match tag {
            "U" => {
                let a = fields(line, 4)?;
                ServerLine::Update {
                    sub_id: num(line, a[1])?,
                    item: num(line, a[2])?,
                    values: a[3].to_string(),
                }
            }
            "REQOK" => {
                let a: Vec<&str> = line.splitn(2, ',').collect();
                let req_id = match a.get(1) {
                    Some(id) => Some(num(line, id)?),
                    None => None,
                };
                ServerLine::ReqOk { req_id }
            }
            "REQERR" => {
                let a = fields(line, 4)?;
                ServerLine::ReqErr {
                    req_id: num(line, a[1])?,
                    code: num(line, a[2])?,
                    message: decode_text(a[3]),
                }
            }
            "PROBE" => ServerLine::Probe,
            "LOOP" => {
                let a: Vec<&str> = line.splitn(2, ',').collect();
                let delay_ms = match a.get(1) {
                    Some(d) => num(line, d)?,
                    None => 0,
                };
                ServerLine::Loop { delay_ms }
            }
            "CONOK" => {
                let a = fields(line, 5)?;
                ServerLine::ConOk {
                    session_id: a[1].to_string(),
                    request_limit: num(line, a[2])?,
                    keepalive_ms: num(line, a[3])?,
                    control_link: match a[4] {
                        "*" | "" => None,
                        link => Some(decode_text(link)),
                    },
                }
            }
            "WSOK" => ServerLine::WsOk,
            "SERVNAME" => ServerLine::ServName(decode_text(fields(line, 2)?[1])),
            "CLIENTIP" => ServerLine::ClientIp(decode_text(fields(line, 2)?[1])),
            "CONS" => {
                let a = fields(line, 2)?;
                let bw = match a[1] {
                    "unlimited" => RealBandwidth::Unlimited,
                    "unmanaged" => RealBandwidth::Unmanaged,
                    value => RealBandwidth::Limited(num(line, value)?),
                };
                ServerLine::Cons(bw)
            }
            "MSGDONE" => {
                let a: Vec<&str> = line.splitn(4, ',').collect();
                if a.len() < 3 {
                    return Err(SessionError::Parse(line.to_string()));
                }
                ServerLine::MsgDone {
                    sequence: sequence_name(a[1]),
                    prog: num(line, a[2])?,
                    response: a.get(3).map(|r| decode_text(r)).unwrap_or_default(),
                }
            }
            "MSGFAIL" => {
                let a = fields(line, 5)?;
                ServerLine::MsgFail {
                    sequence: sequence_name(a[1]),
                    prog: num(line, a[2])?,
                    code: num(line, a[3])?,
                    message: decode_text(a[4]),
                }
            }
            "PROG" => ServerLine::Prog(num(line, fields(line, 2)?[1])?),
            "SUBOK" => {
                let a = fields(line, 4)?;
                ServerLine::SubOk {
                    sub_id: num(line, a[1])?,
                    items: num(line, a[2])?,
                    fields: num(line, a[3])?,
                }
            }
            "SUBCMD" => {
                let a = fields(line, 6)?;
                ServerLine::SubCmd {
                    sub_id: num(line, a[1])?,
                    items: num(line, a[2])?,
                    fields: num(line, a[3])?,
                    key_idx: num(line, a[4])?,
                    cmd_idx: num(line, a[5])?,
                }
            }
            "UNSUB" => ServerLine::Unsub {
                sub_id: num(line, fields(line, 2)?[1])?,
            },
            "CONF" => {
                let a = parse_arguments(line);
                if a.len() < 3 {
                    return Err(SessionError::Parse(line.to_string()));
                }
                let frequency = match a[2] {
                    "unlimited" => MaxFrequency::Unlimited,
                    value => MaxFrequency::Limited(num(line, value)?),
                };
                ServerLine::Conf {
                    sub_id: num(line, a[1])?,
                    frequency,
                }
            }
            "EOS" => {
                let a = fields(line, 3)?;
                ServerLine::Eos {
                    sub_id: num(line, a[1])?,
                    item: num(line, a[2])?,
                }
            }
            "CS" => {
                let a = fields(line, 3)?;
                ServerLine::Cs {
                    sub_id: num(line, a[1])?,
                    item: num(line, a[2])?,
                }
            }
            "OV" => {
                let a = fields(line, 4)?;
                ServerLine::Ov {
                    sub_id: num(line, a[1])?,
                    item: num(line, a[2])?,
                    lost: num(line, a[3])?,
                }
            }
            "NOOP" => ServerLine::Noop,
            "CONERR" | "END" | "ERROR" => {
                let a: Vec<&str> = line.splitn(3, ',').collect();
                if a.len() < 2 {
                    return Err(SessionError::Parse(line.to_string()));
                }
                let code = num(line, a[1])?;
                let message = a.get(2).map(|m| decode_text(m)).unwrap_or_default();
                match tag {
                    "CONERR" => ServerLine::ConErr { code, message },
                    "END" => ServerLine::End { code, message },
                    _ => ServerLine::Error { code, message },
                }
            }
            "SYNC" => ServerLine::Sync {
                seconds: num(line, fields(line, 2)?[1])?,
            },
            "MPNREG" => {
                let a = fields(line, 3)?;
                ServerLine::MpnReg {
                    device_id: decode_text(a[1]),
                    adapter_name: decode_text(a[2]),
                }
            }
            "MPNZERO" => ServerLine::MpnZero {
                device_id: decode_text(fields(line, 2)?[1]),
            },
            "MPNOK" => {
                let a = fields(line, 3)?;
                ServerLine::MpnOk {
                    sub_id: num(line, a[1])?,
                    mpn_sub_id: decode_text(a[2]),
                }
            }
            "MPNDEL" => ServerLine::MpnDel {
                mpn_sub_id: decode_text(fields(line, 2)?[1]),
            },
            "MPNCONF" => ServerLine::MpnConf {
                mpn_sub_id: decode_text(fields(line, 2)?[1]),
            },
            _ => return Err(SessionError::Parse(line.to_string())),
        };
        Ok(parsed)
    }

    /// Data-bearing lines are counted by the recovery progressives and pass through the
    /// fresh/stale gate before being applied.
    pub(crate) fn is_data(&self) -> bool {
        matches!(
            self,
            ServerLine::Update { .. }
                | ServerLine::SubOk { .. }
                | ServerLine::SubCmd { .. }
                | ServerLine::Unsub { .. }
                | ServerLine::Eos { .. }
                | ServerLine::Cs { .. }
                | ServerLine::Ov { .. }
                | ServerLine::Conf { .. }
                | ServerLine::MsgDone { .. }
                | ServerLine::MsgFail { .. }
                | ServerLine::MpnReg { .. }
                | ServerLine::MpnZero { .. }
                | ServerLine::MpnOk { .. }
                | ServerLine::MpnDel { .. }
                | ServerLine::MpnConf { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conok() {
        let line = ServerLine::parse("CONOK,S8f4aec42c3c14ad0,50000,5000,*").unwrap();
        assert_eq!(
            line,
            ServerLine::ConOk {
                session_id: "S8f4aec42c3c14ad0".to_string(),
                request_limit: 50000,
                keepalive_ms: 5000,
                control_link: None,
            }
        );
        let line = ServerLine::parse("CONOK,S1,1000,3000,push2.example.com").unwrap();
        assert!(matches!(
            line,
            ServerLine::ConOk { control_link: Some(ref l), .. } if l == "push2.example.com"
        ));
    }

    #[test]
    fn test_parse_update_keeps_commas_in_values() {
        let line = ServerLine::parse("U,3,1,a|b,c|#").unwrap();
        assert_eq!(
            line,
            ServerLine::Update {
                sub_id: 3,
                item: 1,
                values: "a|b,c|#".to_string()
            }
        );
        assert!(line.is_data());
    }

    #[test]
    fn test_parse_request_responses() {
        assert_eq!(
            ServerLine::parse("REQOK,12").unwrap(),
            ServerLine::ReqOk { req_id: Some(12) }
        );
        assert_eq!(
            ServerLine::parse("REQOK").unwrap(),
            ServerLine::ReqOk { req_id: None }
        );
        assert_eq!(
            ServerLine::parse("REQERR,4,17,bad%20adapter").unwrap(),
            ServerLine::ReqErr {
                req_id: 4,
                code: 17,
                message: "bad adapter".to_string()
            }
        );
    }

    #[test]
    fn test_parse_messages() {
        assert_eq!(
            ServerLine::parse("MSGDONE,*,3,ok%20done").unwrap(),
            ServerLine::MsgDone {
                sequence: UNORDERED_MESSAGES.to_string(),
                prog: 3,
                response: "ok done".to_string()
            }
        );
        assert_eq!(
            ServerLine::parse("MSGFAIL,seq1,7,39,4").unwrap(),
            ServerLine::MsgFail {
                sequence: "seq1".to_string(),
                prog: 7,
                code: 39,
                message: "4".to_string()
            }
        );
    }

    #[test]
    fn test_parse_subscription_lines() {
        assert_eq!(
            ServerLine::parse("SUBCMD,2,1,4,1,2").unwrap(),
            ServerLine::SubCmd {
                sub_id: 2,
                items: 1,
                fields: 4,
                key_idx: 1,
                cmd_idx: 2
            }
        );
        assert_eq!(
            ServerLine::parse("CONF,2,unlimited,filtered").unwrap(),
            ServerLine::Conf {
                sub_id: 2,
                frequency: MaxFrequency::Unlimited
            }
        );
        assert_eq!(
            ServerLine::parse("CONF,2,2.5").unwrap(),
            ServerLine::Conf {
                sub_id: 2,
                frequency: MaxFrequency::Limited(2.5)
            }
        );
        assert_eq!(
            ServerLine::parse("OV,2,1,10").unwrap(),
            ServerLine::Ov {
                sub_id: 2,
                item: 1,
                lost: 10
            }
        );
    }

    #[test]
    fn test_parse_session_lines() {
        assert_eq!(
            ServerLine::parse("LOOP,0").unwrap(),
            ServerLine::Loop { delay_ms: 0 }
        );
        assert_eq!(
            ServerLine::parse("CONS,unlimited").unwrap(),
            ServerLine::Cons(RealBandwidth::Unlimited)
        );
        assert_eq!(
            ServerLine::parse("CONS,40.5").unwrap(),
            ServerLine::Cons(RealBandwidth::Limited(40.5))
        );
        assert_eq!(
            ServerLine::parse("END,41,closed").unwrap(),
            ServerLine::End {
                code: 41,
                message: "closed".to_string()
            }
        );
        assert_eq!(
            ServerLine::parse("SYNC,12").unwrap(),
            ServerLine::Sync { seconds: 12 }
        );
        assert!(!ServerLine::parse("PROBE").unwrap().is_data());
    }

    #[test]
    fn test_parse_mpn_lines() {
        assert_eq!(
            ServerLine::parse("MPNREG,dev1,MPN%20ADAPTER").unwrap(),
            ServerLine::MpnReg {
                device_id: "dev1".to_string(),
                adapter_name: "MPN ADAPTER".to_string()
            }
        );
        assert_eq!(
            ServerLine::parse("MPNOK,5,mpn-1").unwrap(),
            ServerLine::MpnOk {
                sub_id: 5,
                mpn_sub_id: "mpn-1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ServerLine::parse("HELLO,1").is_err());
        assert!(ServerLine::parse("SUBOK,x,1,1").is_err());
        assert!(ServerLine::parse("CONOK,S1").is_err());
        assert!(ServerLine::parse("REQERR,1").is_err());
    }
}
