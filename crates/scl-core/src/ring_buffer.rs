//! Кольцевой буфер фиксированной ёмкости
//!
//! Используется парсером кадров как скользящее окно по входящему потоку.
//! Буфер никогда не растёт: после заполнения самый старый байт молча
//! перезаписывается.

/// Кольцевой буфер на `N` байт с относительной адресацией
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    cursor: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Ёмкость буфера
    pub const CAPACITY: usize = N;

    /// Создать пустой (заполненный нулями) буфер
    pub fn new() -> Self {
        assert!(N > 0, "ёмкость кольцевого буфера должна быть больше нуля");
        Self {
            data: [0; N],
            cursor: 0,
        }
    }

    /// Прочитать байт по смещению относительно курсора
    ///
    /// `peek(0)` возвращает последний записанный байт, `peek(-1)` предыдущий и так
    /// далее до `peek(-(N - 1))`.
    pub fn peek(&self, offset: isize) -> u8 {
        self.data[self.slot(offset)]
    }

    /// Записать байт: курсор сдвигается, затем байт пишется
    pub fn push(&mut self, byte: u8) {
        self.cursor = (self.cursor + 1) % N;
        self.data[self.cursor] = byte;
    }

    /// Скопировать последние `out.len()` байт, заканчивая смещением `end`
    pub fn copy_window(&self, end: isize, out: &mut [u8]) {
        let len = out.len() as isize;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.peek(end - len + 1 + i as isize);
        }
    }

    fn slot(&self, offset: isize) -> usize {
        (self.cursor as isize + offset).rem_euclid(N as isize) as usize
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
