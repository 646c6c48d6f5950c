//! 展平序列
//!
//! 把“产生迭代器的数据源”组合成一个扁平的惰性序列。空数据源被直接跳过，
//! 下一个数据源只在前一个耗尽后才被展开。

use crate::archive::stream::LazySequence;
use crate::utils::{CoreError, Result};

/// 展平多个数据源的惰性序列
pub struct FlattenSequence<O, I>
where
    O: Iterator,
    O::Item: IntoIterator<IntoIter = I, Item = I::Item>,
    I: Iterator,
{
    sources: O,
    current: Option<I>,
    lookahead: Option<I::Item>,
}

impl<O, I> FlattenSequence<O, I>
where
    O: Iterator,
    O::Item: IntoIterator<IntoIter = I, Item = I::Item>,
    I: Iterator,
{
    /// 由数据源迭代器创建
    pub fn new(sources: O) -> Self {
        Self {
            sources,
            current: None,
            lookahead: None,
        }
    }

    fn advance(&mut self) -> bool {
        if self.lookahead.is_some() {
            return true;
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next() {
                    self.lookahead = Some(item);
                    return true;
                }
            }
            match self.sources.next() {
                Some(source) => self.current = Some(source.into_iter()),
                None => {
                    self.current = None;
                    return false;
                }
            }
        }
    }
}

impl<O, I> LazySequence for FlattenSequence<O, I>
where
    O: Iterator,
    O::Item: IntoIterator<IntoIter = I, Item = I::Item>,
    I: Iterator,
{
    type Item = I::Item;

    fn has_more(&mut self) -> Result<bool> {
        Ok(self.advance())
    }

    fn take_next(&mut self) -> Result<I::Item> {
        self.advance();
        self.lookahead.take().ok_or(CoreError::ExhaustedSequence)
    }
}

impl<O, I> Iterator for FlattenSequence<O, I>
where
    O: Iterator,
    O::Item: IntoIterator<IntoIter = I, Item = I::Item>,
    I: Iterator,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.advance();
        self.lookahead.take()
    }
}
