use std::net::SocketAddr;

use newt_msg::{known, tcp, Block, CodeKind, Id, Message, Payload, TryFromBytes, Type};

use super::{Act, Event, Exchange, Inner, Kind, Outcome, Queued, Seen};
use crate::block::{self, Accepted, Upload};
use crate::error::{What, When};
use crate::logging::msg_summary;
use crate::net::{Addrd, Framing, Transport};
use crate::observe::Delivery;
use crate::resp::{code, Resp};
use crate::time::{Clock, Millis};

/// What a response means for the exchange it belongs to
enum Next {
  /// Nothing; a duplicate block
  Ignore,
  /// Send the next request of a block-wise transfer
  Send(Message),
  /// The exchange is over
  Done(Outcome),
}

fn upload_request(ex: &Exchange, block: Block, payload: Vec<u8>) -> Message {
  let mut msg = ex.request.clone();
  msg.payload = Payload(payload);
  msg.set_block1(block);
  msg
}

fn download_request(ex: &Exchange, num: u32, size: u16) -> Message {
  let mut msg = ex.request.clone();
  msg.payload = Payload(vec![]);
  msg.remove(known::BLOCK1);
  msg.remove(known::SIZE1);
  msg.remove(known::OBSERVE);
  msg.set_block2(Block::new(size, num, false));
  msg
}

impl<T: Transport, C: Clock> Inner<T, C> {
  pub(crate) fn recv(&self, chunk: Addrd<&[u8]>) {
    let now = self.now_or_last();
    match self.transport.framing() {
      | Framing::Datagram => self.recv_datagram(chunk, now),
      | Framing::Stream => self.recv_stream(chunk, now),
    }
  }

  fn recv_datagram(&self, dgram: Addrd<&[u8]>, now: Millis) {
    let Addrd(bytes, peer) = dgram;

    match Message::try_from_bytes(bytes) {
      | Ok(msg) => self.handle(Addrd(msg, peer), now),
      | Err(e) => {
        log::warn!("{}", When::Receiving(peer).what(What::from(e)));

        // a CON we could read the header of gets rejected (RFC7252 4.2)
        let con = bytes.len() >= 4 && bytes[0] >> 6 == 1 && (bytes[0] >> 4) & 0b11 == 0;
        if con {
          let rst = Message::empty(Type::Reset, Id::from_be_bytes([bytes[2], bytes[3]]));
          self.send_msg(Addrd(&rst, peer));
        }
      },
    }
  }

  fn recv_stream(&self, chunk: Addrd<&[u8]>, now: Millis) {
    let Addrd(bytes, peer) = chunk;

    let max = self.config.msg.max_size;
    let (msgs, oversized) = {
      let mut buf = self.streams.entry(peer).or_default();
      buf.extend_from_slice(bytes);

      let mut msgs = vec![];
      let oversized = loop {
        match tcp::frame_len(&buf) {
          | Some(len) if len > max => break Some(len),
          | _ => (),
        }

        match tcp::decode_frame(&buf) {
          | Ok(Some((msg, len))) => {
            buf.drain(..len);
            msgs.push(msg);
          },
          | Ok(None) => break None,
          | Err(e) => {
            log::warn!("{}", When::Receiving(peer).what(What::from(e)));
            match tcp::frame_len(&buf) {
              | Some(len) if len <= buf.len() => drop(buf.drain(..len)),
              | _ => buf.clear(),
            }
          },
        }
      };

      (msgs, oversized)
    };

    msgs.into_iter()
        .for_each(|msg| self.handle(Addrd(msg, peer), now));

    if let Some(len) = oversized {
      log::warn!("{} announced a {} byte frame (limit {}), closing",
                 peer,
                 len,
                 max);
      self.streams.remove(&peer);
      self.transport.close(peer);
    }
  }

  pub(crate) fn handle(&self, msg: Addrd<Message>, now: Millis) {
    let Addrd(msg, peer) = msg;
    log::trace!("<- {} {}", peer, msg_summary(&msg));

    match (msg.ty, msg.kind()) {
      | (Type::Ack, CodeKind::Empty) => self.on_empty_ack(peer, msg.id, now),
      | (Type::Reset, CodeKind::Empty) => self.on_reset(peer, msg.id, now),
      | (Type::Con, CodeKind::Empty) if self.datagram() => {
        log::debug!("{} pinged us", peer);
        self.send_msg(Addrd(&msg.rst(), peer));
      },
      | (Type::Ack, CodeKind::Response) => self.on_piggybacked(Addrd(msg, peer), now),
      | (Type::Con, CodeKind::Response) | (Type::Non, CodeKind::Response) => {
        self.on_separate(Addrd(msg, peer), now)
      },
      | (Type::Con, CodeKind::Request) | (Type::Non, CodeKind::Request) => {
        self.on_request(Addrd(msg, peer), now)
      },
      | (ty, kind) => log::debug!("ignoring {:?} {:?} message from {}", ty, kind, peer),
    }
  }

  /// Send a reply to an inbound message and remember it, so that
  /// duplicates of the message get the same reply
  pub(crate) fn reply(&self, peer: SocketAddr, id: Id, reply: &Message) {
    if let Some(bytes) = self.send_msg(Addrd(reply, peer)) {
      if self.datagram() {
        self.dedup.replied(peer, id, bytes);
      }
    }
  }

  /// Check an inbound id for duplicates; yields `true` if
  /// the message is new and should be processed
  pub(crate) fn first_time(&self, peer: SocketAddr, id: Id, now: Millis) -> bool {
    if !self.datagram() {
      return true;
    }

    match self.dedup.inbound(peer, id, now) {
      | None => true,
      | Some(Seen::Replied(bytes)) => {
        log::debug!("duplicate {:?} from {}; repeating our reply", id, peer);
        if let Err(e) = self.transport.send(Addrd(&bytes, peer)) {
          log::warn!("{}", When::Receiving(peer).what(What::from(&e)));
        }
        false
      },
      | Some(seen) => {
        log::debug!("duplicate {:?} from {} ({:?}); ignoring", id, peer, seen);
        false
      },
    }
  }

  fn on_empty_ack(&self, peer: SocketAddr, id: Id, now: Millis) {
    let ex = match self.exchange_by_id(peer, id) {
      | Some(ex) => ex,
      | None => {
        log::debug!("ACK {:?} from {} matches nothing", id, peer);
        return;
      },
    };

    let next = {
      let mut ex = ex.lock();
      let finishes = matches!(ex.kind, Kind::Notification | Kind::Ping);

      match (ex.msg.id == id, finishes) {
        | (false, _) => None,
        | (true, true) => {
          let ack = Resp::from(Message::empty(Type::Ack, id));
          self.deliver(&mut ex, Ok(Addrd(ack, peer)), now)
        },
        | (true, false) => self.apply(&mut ex, Event::EmptyAck, now),
      }
    };

    self.launch(next);
  }

  fn on_reset(&self, peer: SocketAddr, id: Id, now: Millis) {
    let ex = match self.exchange_by_id(peer, id) {
      | Some(ex) => ex,
      | None => {
        match self.observers.reset(peer, id) {
          | true => log::debug!("{} rejected a notification; no longer observing", peer),
          | false => log::debug!("RST {:?} from {} matches nothing", id, peer),
        }
        return;
      },
    };

    let next = {
      let mut ex = ex.lock();
      let ping = matches!(ex.kind, Kind::Ping);

      match (ex.msg.id == id, ping) {
        | (false, _) => None,
        | (true, true) => {
          let rst = Resp::from(Message::empty(Type::Reset, id));
          self.deliver(&mut ex, Ok(Addrd(rst, peer)), now)
        },
        | (true, false) => self.apply(&mut ex, Event::Reset, now),
      }
    };

    self.launch(next);
  }

  fn on_piggybacked(&self, msg: Addrd<Message>, now: Millis) {
    let Addrd(msg, peer) = msg;

    let ex = match self.exchange_by_id(peer, msg.id) {
      | Some(ex) => ex,
      | None => {
        log::debug!("ACK {:?} {} from {} matches nothing",
                    msg.id,
                    msg.token,
                    peer);
        return;
      },
    };

    let next = {
      let mut ex = ex.lock();
      if ex.msg.id != msg.id || ex.msg.token != msg.token {
        log::debug!("ACK {:?} from {} carries token {}, expected {}",
                    msg.id,
                    peer,
                    msg.token,
                    ex.msg.token);
        None
      } else if ex.state.is_terminal() {
        None
      } else if let Err(e) = msg.check_critical(&[]) {
        self.reject(&mut ex, What::from(e), now)
      } else {
        self.on_response(&mut ex, Addrd(msg, peer), now)
      }
    };

    self.launch(next);
  }

  fn on_separate(&self, msg: Addrd<Message>, now: Millis) {
    let Addrd(msg, peer) = msg;
    let con = self.datagram() && msg.ty == Type::Con;
    let id = msg.id;
    let ack = || {
      if con {
        self.reply(peer, id, &Message::empty(Type::Ack, id));
      }
    };

    if !self.first_time(peer, id, now) {
      return;
    }

    let key = Addrd(msg.token, peer);
    let ex = self.exchange(&key);

    if let Err(e) = msg.check_critical(&[]) {
      if con {
        self.reply(peer, id, &msg.rst());
      }

      match ex.filter(|ex| !ex.lock().state.is_terminal()) {
        | Some(ex) => {
          let next = {
            let mut ex = ex.lock();
            match ex.state.is_terminal() {
              | true => None,
              | false => self.reject(&mut ex, What::from(e), now),
            }
          };

          self.launch(next);
        },
        | None => log::warn!("{}", When::Receiving(peer).what(What::from(e))),
      }

      return;
    }

    if let Some(ex) = ex.clone().filter(|ex| !ex.lock().state.is_terminal()) {
      ack();
      let next = {
        let mut ex = ex.lock();
        match ex.state.is_terminal() {
          | true => None,
          | false => self.on_response(&mut ex, Addrd(msg, peer), now),
        }
      };

      self.launch(next);
      return;
    }

    match self.observations.notify(&key, &msg, now) {
      | Delivery::Delivered | Delivery::Ended => ack(),
      | Delivery::Stale => {
        log::debug!("{} sent a stale notification for {}", peer, key.0);
        ack()
      },
      | Delivery::Unknown if msg.observe().is_some() => {
        log::debug!("notification {} from {} for nothing we observe; rejecting",
                    key.0,
                    peer);
        self.reply(peer, id, &msg.rst());
      },
      | Delivery::Unknown if ex.is_some() => {
        log::debug!("late response {} from {}", key.0, peer);
        ack()
      },
      | Delivery::Unknown if con => {
        log::debug!("response {} from {} matches nothing; rejecting", key.0, peer);
        self.reply(peer, id, &msg.rst());
      },
      | Delivery::Unknown => log::debug!("response {} from {} matches nothing", key.0, peer),
    }
  }

  /// A response to `ex` that we cannot accept fails the exchange
  fn reject(&self, ex: &mut Exchange, what: What, now: Millis) -> Option<Queued> {
    log::warn!("{}", When::Receiving(ex.key.1).what(what));
    self.apply(ex, Event::Failed(what), now)
  }

  fn on_response(&self, ex: &mut Exchange, msg: Addrd<Message>, now: Millis) -> Option<Queued> {
    match self.continuation(ex, msg, now) {
      | Next::Ignore => None,
      | Next::Send(next) => {
        let (state, act) = ex.state.step(Event::Continue);
        ex.state = state;
        match act {
          | Act::SendNext => self.send_next(ex, next, now),
          | _ => None,
        }
      },
      | Next::Done(outcome) => self.deliver(ex, outcome, now),
    }
  }

  /// Decide whether a response finishes its exchange or
  /// continues a block-wise transfer
  fn continuation(&self, ex: &mut Exchange, msg: Addrd<Message>, now: Millis) -> Next {
    let Addrd(msg, peer) = msg;
    let key = ex.key;
    let fail = |e: block::Error| Next::Done(Err(When::Receiving(peer).what(What::from(e))));

    if self.blocks.is_uploading(&key) {
      match msg.code == code::CONTINUE {
        | true => {
          let echoed = msg.block1().or_else(|| ex.msg.block1());
          match echoed.map(|b| self.blocks.upload_acked(&key, b, now)) {
            | Some(Ok(Upload::Next(block, payload))) => {
              return Next::Send(upload_request(ex, block, payload))
            },
            | Some(Ok(_)) | None => (),
            | Some(Err(e)) => return fail(e),
          }
        },
        | false => self.blocks.forget(&key),
      }
    }

    match msg.block2().filter(|_| msg.code.is_success()) {
      | Some(b) if b.more() || self.blocks.is_downloading(&key) => {
        if b.num() == 0 {
          ex.observe_seq = msg.observe();
        }

        match self.blocks
                  .download(key, &msg, b, self.config.block.max_body, now)
        {
          | Ok(Accepted::More { next }) => Next::Send(download_request(ex, next, b.size())),
          | Ok(Accepted::Duplicate) => Next::Ignore,
          | Ok(Accepted::Complete(body)) => {
            let mut full = msg;
            full.payload = Payload(body);
            full.remove(known::BLOCK2);
            if let Some(seq) = ex.observe_seq {
              full.set_observe(seq);
            }

            Next::Done(Ok(Addrd(Resp::from(full), peer)))
          },
          | Err(e) => fail(e),
        }
      },
      | _ => Next::Done(Ok(Addrd(Resp::from(msg), peer))),
    }
  }
}
