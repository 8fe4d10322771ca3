use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use newt_msg::observe::Action;
use newt_msg::{known, Block, Code, Message, Payload, Type};

use crate::block::{self, Accepted};
use crate::error::{Malformed, What, When};
use crate::exchange::{Engine, Inner};
use crate::net::{Addrd, Transport};
use crate::req::{Method, Req};
use crate::resp::{code, Resp};
use crate::time::{Clock, Millis};

/// Path patterns
pub mod path;

pub use path::{Params, Pattern};

#[doc(inline)]
pub use crate::observe::server::Notifier;

/// A request handler.
///
/// Invoked exactly once for every request that is not a duplicate,
/// and once per observer for every notification.
pub type Handler = Arc<dyn Fn(&Addrd<Req>, &Context) -> Resp + Send + Sync>;

/// Everything a [`Handler`] knows besides the request itself
#[derive(Debug, Clone)]
pub struct Context {
  path: String,
  params: Params,
  observe: Option<Action>,
  notification: bool,
  notifier: Notifier,
}

impl Context {
  /// The request path, without leading or trailing slashes
  pub fn path(&self) -> &str {
    &self.path
  }

  /// A value captured by the route's pattern
  pub fn param(&self, name: &str) -> Option<&str> {
    self.params.get(name).map(String::as_str)
  }

  /// Every value captured by the route's pattern
  pub fn params(&self) -> &Params {
    &self.params
  }

  /// Whether the request wants to start or stop observing the resource.
  ///
  /// Only GET and FETCH requests can observe; for anything else this is `None`.
  pub fn observe(&self) -> Option<Action> {
    self.observe
  }

  /// Is the handler being run to produce a notification
  /// for an existing observer, rather than for a request?
  pub fn is_notification(&self) -> bool {
    self.notification
  }

  /// Notifies the observers of this resource
  pub fn notifier(&self) -> &Notifier {
    &self.notifier
  }
}

/// Routes requests to handlers by path.
///
/// The first registered pattern that matches wins.
#[derive(Default)]
pub(crate) struct Router {
  routes: Vec<(Pattern, Handler)>,
}

impl core::fmt::Debug for Router {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_list()
     .entries(self.routes.iter().map(|(p, _)| p.as_str()))
     .finish()
  }
}

impl Router {
  /// Add a route; a route with the same pattern is replaced in place
  pub(crate) fn add(&mut self, pattern: Pattern, handler: Handler) -> bool {
    match self.routes.iter_mut().find(|(p, _)| *p == pattern) {
      | Some(route) => {
        route.1 = handler;
        true
      },
      | None => {
        self.routes.push((pattern, handler));
        false
      },
    }
  }

  pub(crate) fn remove(&mut self, pattern: &Pattern) -> bool {
    let before = self.routes.len();
    self.routes.retain(|(p, _)| p != pattern);
    self.routes.len() < before
  }

  pub(crate) fn route(&self, path: &str) -> Option<(Handler, Params)> {
    self.routes
        .iter()
        .find_map(|(p, h)| p.matches(path).map(|params| (h.clone(), params)))
  }

  pub(crate) fn len(&self) -> usize {
    self.routes.len()
  }
}

/// Shape a response into the reply to `req`: piggybacked on the ACK
/// of a CON, a NON otherwise.
fn answering(mut resp: Message, req: &Message) -> Message {
  resp.ty = match req.ty {
    | Type::Con => Type::Ack,
    | _ => Type::Non,
  };
  resp.id = req.id;
  resp.token = req.token;
  resp
}

fn reply_to(req: &Message, code: Code) -> Message {
  answering(Message::from(Resp::new(code)), req)
}

fn too_large(req: &Message, max: usize) -> Message {
  let mut msg = reply_to(req, code::REQUEST_ENTITY_TOO_LARGE);
  msg.set_uint(known::SIZE1, max.min(u32::MAX as usize) as u32);
  msg
}

impl<T: Transport, C: Clock> Inner<T, C> {
  /// Run the handler routed to by a request's path
  pub(crate) fn dispatch(&self, req: &Addrd<Req>, notification: bool) -> Resp {
    let path = match req.data().path() {
      | Ok(path) => path,
      | Err(_) => return Resp::new(code::BAD_REQUEST),
    };

    // never hold the router lock while a handler runs
    let route = self.router.read().route(&path);

    match route {
      | Some((handler, params)) => {
        let msg = req.data().msg();
        let observe = msg.observe_action()
                         .filter(|_| req.data().method().is_observable());
        let ctx = Context { notifier: self.notifier(&path),
                            path,
                            params,
                            observe,
                            notification };

        handler(req, &ctx)
      },
      | None => {
        log::debug!("{} {} /{}: no route", req.addr(), req.data().method(), path);
        Resp::new(code::NOT_FOUND)
      },
    }
  }

  /// A request arrived from a peer; answer it
  pub(crate) fn on_request(&self, msg: Addrd<Message>, now: Millis) {
    let Addrd(msg, peer) = msg;
    let id = msg.id;
    let key = Addrd(msg.token, peer);

    if !self.first_time(peer, id, now) {
      return;
    }

    let busy = match self.handling.entry(key) {
      | Entry::Occupied(_) => true,
      | Entry::Vacant(v) => {
        v.insert(id);
        false
      },
    };

    if busy {
      let collision = What::MalformedMessage(Malformed::TokenCollision(key.0));
      log::warn!("{}", When::Receiving(peer).what(collision));
      if self.datagram() && msg.ty == Type::Con {
        self.reply(peer, id, &msg.rst());
      }
      return;
    }

    let mut reply = self.respond(msg, peer, now);
    self.handling.remove(&key);

    if self.datagram() && reply.ty == Type::Non {
      match self.ids.next_id(peer, &self.dedup, now) {
        | Some(id) => reply.id = id,
        | None => {
          log::warn!("no message ids left for {}; dropping response {}", peer, key.0);
          return;
        },
      }
    }

    self.reply(peer, id, &reply);
  }

  fn respond(&self, mut msg: Message, peer: SocketAddr, now: Millis) -> Message {
    let key = Addrd(msg.token, peer);
    let max = self.config.block.max_body;

    if let Err(e) = msg.check_critical(&[]) {
      log::debug!("{}", When::Receiving(peer).what(What::from(e)));
      return reply_to(&msg, code::BAD_OPTION);
    }

    let path = match msg.path() {
      | Ok(path) => path,
      | Err(_) => return reply_to(&msg, code::BAD_REQUEST),
    };

    if msg.get_uint(known::SIZE1)
          .map(|size| size as usize > max)
          .unwrap_or(false)
    {
      return too_large(&msg, max);
    }

    let mut block1 = None;
    if let Some(b) = msg.block1() {
      match self.blocks.request_block(key, &msg, b, max, now) {
        | Ok(Accepted::More { .. }) | Ok(Accepted::Duplicate) => {
          let mut cont = reply_to(&msg, code::CONTINUE);
          cont.set_block1(Block::new(b.size(), b.num(), true));
          return cont;
        },
        | Ok(Accepted::Complete(body)) => {
          log::debug!("{} uploaded {} bytes to /{}", peer, body.len(), path);
          msg.payload = Payload(body);
          msg.remove(known::BLOCK1);
          msg.remove(known::SIZE1);
          block1 = Some(b);
        },
        | Err(block::Error::TooLarge { max }) => return too_large(&msg, max),
        | Err(e) => {
          log::debug!("{}", When::Receiving(peer).what(What::from(e)));
          return reply_to(&msg, code::REQUEST_ENTITY_INCOMPLETE);
        },
      }
    }

    let block2 = msg.block2();
    if let Some(b) = block2.filter(|b| b.num() > 0) {
      match self.blocks.cached_response(peer, &path, b) {
        | Some(Some(block)) => return answering(block, &msg),
        | Some(None) => return reply_to(&msg, code::BAD_OPTION),
        | None => (),
      }
    }

    let observe = msg.observe_action()
                     .filter(|_| Method::from(msg.code).is_observable());

    let req = Addrd(Req::from(msg), peer);
    let mut resp = Message::from(self.dispatch(&req, false));
    let msg = Message::from(req.unwrap());

    match (observe, resp.code.is_success()) {
      | (Some(Action::Register), true) => {
        let mut registration = msg.clone();
        registration.remove(known::BLOCK2);
        self.observers.register(key, path.clone(), registration);
        resp.set_observe(self.observers.next_seq(&path));
      },
      | (Some(_), _) => {
        self.observers.remove(&key);
        resp.remove(known::OBSERVE);
      },
      | (None, _) => drop(resp.remove(known::OBSERVE)),
    }

    if let Some(b) = block1 {
      resp.set_block1(Block::new(b.size(), b.num(), false));
    }

    let size = block2.map(|b| b.size().min(self.config.block_size()))
                     .unwrap_or_else(|| self.config.block_size());
    let num = block2.map(|b| b.num()).unwrap_or(0);

    if (self.datagram() || block2.is_some()) && resp.payload.0.len() > size as usize {
      match block::slice(&resp, num, size) {
        | Some(block) => {
          if block.block2().map(|b| b.more()).unwrap_or(false) {
            self.blocks.cache_response(peer, path, resp, now);
          }
          resp = block;
        },
        | None => return reply_to(&msg, code::BAD_OPTION),
      }
    }

    answering(resp, &msg)
  }
}

impl<T: Transport, C: Clock> Engine<T, C> {
  /// Handle requests whose path matches `pattern` (see [`Pattern`]).
  ///
  /// Patterns are tried in the order they were registered.
  /// Registering a pattern again replaces its handler.
  ///
  /// ```no_run
  /// use newt::config::Config;
  /// use newt::resp::{code, Resp};
  ///
  /// let (engine, _runtime) = newt::std::bind("0.0.0.0:5683", Config::default()).unwrap();
  ///
  /// engine.register_handler("hello/{name}", |_req, ctx| {
  ///         let mut resp = Resp::new(code::CONTENT);
  ///         resp.set_payload(format!("hello, {}!", ctx.param("name").unwrap_or("you")));
  ///         resp
  ///       });
  /// ```
  pub fn register_handler<F>(&self, pattern: &str, f: F)
    where F: Fn(&Addrd<Req>, &Context) -> Resp + Send + Sync + 'static
  {
    let pattern = Pattern::parse(pattern);
    log::debug!("routing {} to a handler", pattern);

    if self.inner.router.write().add(pattern.clone(), Arc::new(f)) {
      log::debug!("replaced the handler of {}", pattern);
    }
  }

  /// Stop handling requests matching `pattern`
  pub fn remove_handler(&self, pattern: &str) -> bool {
    self.inner
        .router
        .write()
        .remove(&Pattern::parse(pattern))
  }

  /// Number of registered handlers
  pub fn handlers(&self) -> usize {
    self.inner.router.read().len()
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Id, Token};

  use super::*;
  use crate::observe::server::Notify;

  struct Nobody;

  impl Notify for Nobody {
    fn notify(&self, _: &str) -> usize {
      0
    }
  }

  fn handler(payload: &'static str) -> Handler {
    Arc::new(move |_, _| {
      let mut resp = Resp::new(code::CONTENT);
      resp.set_payload(payload);
      resp
    })
  }

  fn run(router: &Router, path: &str) -> Option<String> {
    let (h, _) = router.route(path)?;
    let req = Addrd(Req::get(path), crate::test::dummy_addr());
    let ctx = Context { path: path.into(),
                        params: Params::new(),
                        observe: None,
                        notification: false,
                        notifier: Notifier::new(path.into(), std::sync::Weak::<Nobody>::new()) };
    h(&req, &ctx).payload_string().ok()
  }

  #[test]
  fn first_match_wins() {
    let mut router = Router::default();
    router.add("a/{x}".into(), handler("param"));
    router.add("a/b".into(), handler("literal"));

    assert_eq!(run(&router, "a/b"), Some("param".into()));
    assert_eq!(run(&router, "c"), None);
  }

  #[test]
  fn same_pattern_replaces() {
    let mut router = Router::default();
    assert!(!router.add("a".into(), handler("one")));
    assert!(router.add("/a/".into(), handler("two")));

    assert_eq!(router.len(), 1);
    assert_eq!(run(&router, "a"), Some("two".into()));

    assert!(router.remove(&"a".into()));
    assert_eq!(run(&router, "a"), None);
  }

  #[test]
  fn answering_piggybacks_on_con() {
    let req = Message::new(Type::Con, Method::GET.code(), Id(9), Token::opaque(&[3]));
    let resp = reply_to(&req, code::NOT_FOUND);
    assert_eq!(resp.ty, Type::Ack);
    assert_eq!(resp.id, Id(9));
    assert_eq!(resp.token, req.token);

    let mut non = req.clone();
    non.ty = Type::Non;
    assert_eq!(reply_to(&non, code::NOT_FOUND).ty, Type::Non);
  }

  #[test]
  fn too_large_carries_limit() {
    let req = Message::new(Type::Con, Method::PUT.code(), Id(1), Token::opaque(&[1]));
    let resp = too_large(&req, 2048);
    assert_eq!(resp.code, code::REQUEST_ENTITY_TOO_LARGE);
    assert_eq!(resp.get_uint(known::SIZE1), Some(2048));
  }
}
