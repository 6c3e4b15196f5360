//! Smartcard transport
//!
//! [`SmartCardConnection`] is the raw byte pipe to a device and is supplied
//! by the caller (a PC/SC reader, an NFC tag, a test double). On top of it
//! [`SmartCardProtocol`] frames commands, chains long bodies, follows
//! "more data" replies and turns non-success status words into errors.
//!
//! The protocol owns its connection and closes it when dropped.

use std::io;

use log::{debug, trace, warn};

use crate::apdu::{ins, ApduFormat, Response, APDU, SHORT_APDU_MAX_CHUNK, SW};
use crate::error::{Error, Result};
use crate::version::Version;

/// A connection able to exchange raw APDUs with a device
pub trait SmartCardConnection {
    /// Send one encoded command and return the raw reply, status word included
    fn transmit(&mut self, apdu: &[u8]) -> io::Result<Vec<u8>>;

    /// Whether the reader and card accept extended length APDUs
    fn is_extended_length_supported(&self) -> bool {
        true
    }

    /// Release the underlying handle
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: SmartCardConnection + ?Sized> SmartCardConnection for Box<C> {
    fn transmit(&mut self, apdu: &[u8]) -> io::Result<Vec<u8>> {
        (**self).transmit(apdu)
    }

    fn is_extended_length_supported(&self) -> bool {
        (**self).is_extended_length_supported()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Request/response protocol over a [`SmartCardConnection`]
pub struct SmartCardProtocol<C: SmartCardConnection> {
    connection: C,
    format: ApduFormat,
    ins_send_remaining: u8,
    closed: bool,
}

impl<C: SmartCardConnection> SmartCardProtocol<C> {
    /// Create a protocol that fetches remaining data with GET RESPONSE
    pub fn new(connection: C) -> Self {
        Self::with_send_remaining(connection, ins::GET_RESPONSE)
    }

    /// Create a protocol with an application-specific "send remaining" instruction
    pub fn with_send_remaining(connection: C, ins_send_remaining: u8) -> Self {
        Self {
            connection,
            format: ApduFormat::Short,
            ins_send_remaining,
            closed: false,
        }
    }

    pub fn apdu_format(&self) -> ApduFormat {
        self.format
    }

    /// Select the APDU length encoding
    pub fn set_apdu_format(&mut self, format: ApduFormat) -> Result<()> {
        if format == ApduFormat::Extended && !self.connection.is_extended_length_supported() {
            return Err(Error::NotSupported(
                "Extended length APDUs are not supported by this connection".to_string(),
            ));
        }
        self.format = format;
        Ok(())
    }

    /// Adjust framing to the firmware: extended APDUs from 4.0.0 when the
    /// connection allows them
    pub fn configure(&mut self, version: Version) {
        if version.is_at_least(4, 0, 0) && self.connection.is_extended_length_supported() {
            debug!("Firmware {} supports extended APDUs", version);
            self.format = ApduFormat::Extended;
        }
    }

    /// Select an application by AID and return the select reply
    pub fn select(&mut self, aid: &[u8]) -> Result<Vec<u8>> {
        debug!("Selecting application {:02X?}", aid);
        let cmd = APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, aid.to_vec());
        match self.send_and_receive(&cmd) {
            Err(Error::Apdu { sw }) if sw == SW::FILE_NOT_FOUND || sw == SW::INS_NOT_SUPPORTED => {
                Err(Error::ApplicationNotAvailable(format!(
                    "Application {:02X?} is not available on this device",
                    aid
                )))
            }
            other => other,
        }
    }

    /// Send a command and return the response data
    ///
    /// Bodies longer than a short APDU are chained when the format is
    /// short. A 61xx reply is followed up until the device has sent
    /// everything. Any final status other than 9000 becomes
    /// [`Error::Apdu`].
    pub fn send_and_receive(&mut self, cmd: &APDU) -> Result<Vec<u8>> {
        let mut response = match self.format {
            ApduFormat::Extended => self.transmit(cmd)?,
            ApduFormat::Short => {
                let mut chunks = cmd.data.chunks(SHORT_APDU_MAX_CHUNK).peekable();
                let mut last = None;
                if chunks.peek().is_none() {
                    last = Some(self.transmit(cmd)?);
                }
                while let Some(chunk) = chunks.next() {
                    let is_last = chunks.peek().is_none();
                    let part = APDU {
                        cla: if is_last { cmd.cla } else { cmd.cla | 0x10 },
                        data: chunk.to_vec(),
                        le: if is_last { cmd.le } else { None },
                        ..cmd.clone()
                    };
                    let reply = self.transmit(&part)?;
                    if !is_last && reply.sw() != SW::SUCCESS {
                        return Err(Error::Apdu { sw: reply.sw() });
                    }
                    last = Some(reply);
                }
                // The loop above always sends at least one part
                last.ok_or_else(|| Error::BadResponse("No response received".to_string()))?
            }
        };

        let mut data = std::mem::take(&mut response.data);
        while let Some(remaining) = response.available_response() {
            trace!("Device has {} more bytes", remaining);
            let follow_up = APDU::new(0x00, self.ins_send_remaining, 0x00, 0x00);
            response = self.transmit(&follow_up)?;
            data.extend_from_slice(&response.data);
        }

        match response.sw() {
            SW::SUCCESS => Ok(data),
            sw => Err(Error::Apdu { sw }),
        }
    }

    fn transmit(&mut self, cmd: &APDU) -> Result<Response> {
        let raw = cmd.to_bytes(self.format)?;
        trace!("SEND: {:02X?}", raw);
        let reply = self.connection.transmit(&raw)?;
        trace!("RECV: {:02X?}", reply);
        Ok(Response::from_bytes(&reply)?)
    }

    /// Close the connection, reporting any error
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        Ok(self.connection.close()?)
    }
}

impl<C: SmartCardConnection> Drop for SmartCardProtocol<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.connection.close() {
            warn!("Failed to close connection: {}", e);
        }
    }
}
