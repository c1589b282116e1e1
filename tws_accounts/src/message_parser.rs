// tws_accounts/src/message_parser.rs
//
// Turn a framed message body into a typed reply.
use log::trace;

use crate::base::IBKRError;
use crate::parser_account::*;
use crate::protocol_dec_parser::FieldParser;
use crate::protocol_decoder::{describe_incoming_type, IncomingMessageType};
use crate::reply::Reply;

/// Decode one message body. The first field is the message type id.
///
/// Types outside the account-updates family decode to `Reply::Unhandled`
/// rather than an error; whoever receives them decides what that means.
pub fn process_message(data: &[u8]) -> Result<Reply, IBKRError> {
  let mut parser = FieldParser::new(data);
  let msg_type = parser.read_int()?;

  let reply = match IncomingMessageType::try_from(msg_type) {
    Ok(IncomingMessageType::ErrorMessage) => process_error_message(&mut parser)?,
    Ok(IncomingMessageType::AccountValue) => process_account_value(&mut parser)?,
    Ok(IncomingMessageType::PortfolioValue) => process_portfolio_value(&mut parser)?,
    Ok(IncomingMessageType::AccountUpdateTime) => process_account_update_time(&mut parser)?,
    Ok(IncomingMessageType::NextValidId) => process_next_valid_id(&mut parser)?,
    Ok(IncomingMessageType::ManagedAccounts) => process_managed_accounts(&mut parser)?,
    Ok(IncomingMessageType::AccountDownloadEnd) => process_account_download_end(&mut parser)?,
    _ => {
      trace!("Not decoding message {}", describe_incoming_type(msg_type));
      Reply::Unhandled { msg_type }
    }
  };

  Ok(reply)
}
