use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates 20-character keys that sort by creation time: eight characters
/// of millisecond timestamp, then twelve random ones. Keys made within the
/// same millisecond bump the random tail so they still sort in order.
#[derive(Debug, Default)]
pub(crate) struct PushIds {
    last_time: i64,
    last_rand: [u8; 12],
}

impl PushIds {
    pub(crate) fn next(&mut self, now: i64) -> String {
        if now == self.last_time {
            for digit in self.last_rand.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::rng();
            for digit in self.last_rand.iter_mut() {
                *digit = rng.random_range(0..64);
            }
            self.last_time = now;
        }

        let mut time = now;
        let mut head = [0u8; 8];
        for slot in head.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }

        let mut id = String::with_capacity(20);
        id.extend(head.iter().map(|&c| c as char));
        id.extend(self.last_rand.iter().map(|&d| PUSH_CHARS[d as usize] as char));
        id
    }
}
