use newt_msg::Message;

/// One-line description of a message, for logs
pub(crate) fn msg_summary(msg: &Message) -> String {
  let payload = match msg.content_format() {
    | Some(format) => format!("{} byte {} payload", msg.payload.0.len(), format),
    | None => format!("{} byte payload", msg.payload.0.len()),
  };

  format!("{:?}: {} {} {:?} token {} with {}",
          msg.kind(),
          msg.ty,
          msg.code,
          msg.id,
          msg.token,
          payload)
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, ContentFormat, Id, Token, Type};

  use super::*;

  #[test]
  fn summary() {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(3), Token::default());
    msg.payload.0 = vec![1, 2, 3];
    assert_eq!(msg_summary(&msg),
               "Request: CON 0.01 Id(3) token 0x with 3 byte payload");

    msg.set_content_format(ContentFormat::Json);
    assert_eq!(msg_summary(&msg),
               "Request: CON 0.01 Id(3) token 0x with 3 byte application/json payload");
  }
}
