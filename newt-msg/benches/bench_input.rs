use newt_msg::*;

#[derive(Clone, Copy, Debug)]
pub struct TestInput {
  pub tkl: u8,
  pub n_opts: usize,
  pub opt_size: usize,
  pub payload_size: usize,
}

impl TestInput {
  pub fn get_bytes(&self) -> Vec<u8> {
    self.get_msg().try_into_bytes().unwrap()
  }

  pub fn get_msg(&self) -> Message {
    let token = Token::try_from_slice(&vec![1; self.tkl as usize]).unwrap();
    let mut msg = Message::new(Type::Con, Code::new(2, 5), Id(1), token);

    // even, unknown numbers: elective and free of length rules
    (0..self.n_opts).for_each(|n| {
                      msg.add(OptNumber(1000 + 2 * n as u32),
                              OptValue(vec![1; self.opt_size]))
                    });
    msg.payload = Payload(vec![1; self.payload_size]);
    msg
  }
}

pub fn inputs() -> Vec<TestInput> {
  vec![TestInput { tkl: 0,
                   n_opts: 0,
                   opt_size: 0,
                   payload_size: 0 },
       TestInput { tkl: 4,
                   n_opts: 4,
                   opt_size: 8,
                   payload_size: 16 },
       TestInput { tkl: 8,
                   n_opts: 8,
                   opt_size: 64,
                   payload_size: 128 },
       TestInput { tkl: 8,
                   n_opts: 16,
                   opt_size: 64,
                   payload_size: 512 },
       TestInput { tkl: 8,
                   n_opts: 32,
                   opt_size: 256,
                   payload_size: 1024 },]
}
