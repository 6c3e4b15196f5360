//! In-memory devices for tests
//!
//! [`VirtualCard`] answers raw APDUs the way a YubiKey does: it dispatches
//! by selected AID to the PIV, OATH and OTP applets, reassembles chained
//! commands and hands out long replies in 61xx chunks. Handles are cheap
//! clones sharing one card, so a test can inspect the card while a session
//! owns the connection.
//!
//! [`ScriptedConnection`] replays canned replies for exchanges the virtual
//! applets would never produce.

mod oath;
mod otp;

pub use self::oath::{parse_put_request, VirtualOath};
pub use self::otp::{BlockView, VirtualOtp};
pub use self::piv::VirtualPiv;

use std::cell::{Cell, RefCell, RefMut};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use log::trace;

use crate::apdu::{ins, parse_apdu, Response, APDU, SW};
use crate::transport::SmartCardConnection;
use crate::version::Version;

/// Serial number reported by every virtual card
pub const SERIAL: u32 = 12_345_678;

/// Largest reply body handed out in one response
const MAX_REPLY_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Application {
    Piv,
    Oath,
    Otp,
}

struct CardState {
    piv: VirtualPiv,
    oath: VirtualOath,
    otp: VirtualOtp,
    selected: Option<Application>,
    chain: Vec<u8>,
    pending: Vec<u8>,
    sent: Vec<APDU>,
    closed: usize,
}

impl CardState {
    fn process(&mut self, cmd: APDU) -> Response {
        if cmd.ins == ins::SELECT && cmd.p1 == 0x04 {
            self.chain.clear();
            self.pending.clear();
            let (application, response) = if cmd.data == piv::PIV_AID {
                (Application::Piv, self.piv.select())
            } else if cmd.data == oath::OATH_AID {
                (Application::Oath, self.oath.select())
            } else if cmd.data == otp::OTP_AID {
                (Application::Otp, self.otp.select())
            } else {
                return Response::error(SW::FILE_NOT_FOUND);
            };
            self.selected = Some(application);
            return self.chunk(response);
        }

        let Some(application) = self.selected else {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        };
        let continuation = match application {
            Application::Oath => oath::INS_SEND_REMAINING,
            Application::Piv | Application::Otp => ins::GET_RESPONSE,
        };
        if cmd.ins == continuation {
            let pending = std::mem::take(&mut self.pending);
            return self.chunk(Response::success(pending));
        }
        self.pending.clear();

        if cmd.is_chained() {
            self.chain.extend_from_slice(&cmd.data);
            return Response::ok();
        }
        let mut data = std::mem::take(&mut self.chain);
        data.extend_from_slice(&cmd.data);
        let cmd = APDU {
            data,
            ..cmd
        };

        let response = match application {
            Application::Piv => self.piv.process(&cmd),
            Application::Oath => self.oath.process(&cmd),
            Application::Otp => self.otp.process(&cmd),
        };
        self.chunk(response)
    }

    fn chunk(&mut self, response: Response) -> Response {
        if !response.is_okay() || response.data.len() <= MAX_REPLY_CHUNK {
            return response;
        }
        let mut data = response.data;
        self.pending = data.split_off(MAX_REPLY_CHUNK);
        Response::more_data(data, self.pending.len().min(0xFF) as u8)
    }
}

/// A simulated YubiKey with PIV, OATH and OTP applications
#[derive(Clone)]
pub struct VirtualCard {
    state: Rc<RefCell<CardState>>,
}

impl VirtualCard {
    pub fn new(version: Version) -> Self {
        Self {
            state: Rc::new(RefCell::new(CardState {
                piv: VirtualPiv::new(version),
                oath: VirtualOath::new(version),
                otp: VirtualOtp::new(version),
                selected: None,
                chain: Vec::new(),
                pending: Vec::new(),
                sent: Vec::new(),
                closed: 0,
            })),
        }
    }

    /// Every command received so far, chained parts included
    pub fn sent(&self) -> Vec<APDU> {
        self.state.borrow().sent.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.borrow().closed
    }

    pub fn piv(&self) -> RefMut<'_, VirtualPiv> {
        RefMut::map(self.state.borrow_mut(), |state| &mut state.piv)
    }

    pub fn oath(&self) -> RefMut<'_, VirtualOath> {
        RefMut::map(self.state.borrow_mut(), |state| &mut state.oath)
    }

    pub fn otp(&self) -> RefMut<'_, VirtualOtp> {
        RefMut::map(self.state.borrow_mut(), |state| &mut state.otp)
    }
}

impl SmartCardConnection for VirtualCard {
    fn transmit(&mut self, apdu: &[u8]) -> io::Result<Vec<u8>> {
        let cmd = parse_apdu(apdu).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        trace!("Virtual card received INS={:02X}", cmd.ins);
        let mut state = self.state.borrow_mut();
        state.sent.push(cmd.clone());
        Ok(state.process(cmd).to_bytes())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.borrow_mut().closed += 1;
        Ok(())
    }
}

/// A connection replaying fixed replies in order
pub struct ScriptedConnection {
    replies: VecDeque<Vec<u8>>,
    log: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: Rc<Cell<usize>>,
    extended: bool,
}

impl ScriptedConnection {
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: replies.into(),
            log: Rc::new(RefCell::new(Vec::new())),
            closed: Rc::new(Cell::new(0)),
            extended: true,
        }
    }

    pub fn without_extended_length(mut self) -> Self {
        self.extended = false;
        self
    }

    /// Raw commands sent so far
    pub fn log(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        Rc::clone(&self.log)
    }

    pub fn close_count(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.closed)
    }
}

impl SmartCardConnection for ScriptedConnection {
    fn transmit(&mut self, apdu: &[u8]) -> io::Result<Vec<u8>> {
        self.log.borrow_mut().push(apdu.to_vec());
        self.replies
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted reply left"))
    }

    fn is_extended_length_supported(&self) -> bool {
        self.extended
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.set(self.closed.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::ApduFormat;

    fn send(card: &mut VirtualCard, cmd: APDU) -> Response {
        let raw = card.transmit(&cmd.to_bytes(ApduFormat::Extended).unwrap()).unwrap();
        Response::from_bytes(&raw).unwrap()
    }

    #[test]
    fn test_unknown_aid() {
        let mut card = VirtualCard::new(Version::new(5, 4, 3));
        let response = send(&mut card, APDU::with_data(0, ins::SELECT, 0x04, 0, vec![0xA0, 0x01]));
        assert_eq!(response.sw(), SW::FILE_NOT_FOUND);
    }

    #[test]
    fn test_command_without_selection() {
        let mut card = VirtualCard::new(Version::new(5, 4, 3));
        let response = send(&mut card, APDU::new(0, 0xFD, 0, 0));
        assert_eq!(response.sw(), SW::CONDITIONS_NOT_SATISFIED);
    }

    #[test]
    fn test_long_reply_is_chunked() {
        let mut card = VirtualCard::new(Version::new(5, 4, 3));
        card.state.borrow_mut().selected = Some(Application::Piv);
        let response = card.state.borrow_mut().chunk(Response::success(vec![0x11; 300]));
        assert_eq!(response.sw(), SW::bytes_remaining(44));
        assert_eq!(response.data.len(), 256);

        let rest = send(&mut card, APDU::new(0, ins::GET_RESPONSE, 0, 0));
        assert!(rest.is_okay());
        assert_eq!(rest.data.len(), 44);
    }
}
