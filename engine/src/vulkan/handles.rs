/// Creates `count` handles in order. When one fails, the handles already
/// created are released newest first and the error is returned.
pub fn create_all<T, E>(
    count: usize,
    mut create: impl FnMut(usize) -> Result<T, E>,
    mut release: impl FnMut(T),
) -> Result<Vec<T>, E> {
    let mut created = Vec::with_capacity(count);
    for index in 0..count {
        match create(index) {
            Ok(handle) => created.push(handle),
            Err(error) => {
                created.into_iter().rev().for_each(&mut release);
                return Err(error);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_releases_earlier_handles_newest_first() {
        let mut released = Vec::new();
        let result = create_all(
            4,
            |i| if i == 2 { Err("out of memory") } else { Ok(i * 10) },
            |h| released.push(h),
        );

        assert_eq!(result, Err("out of memory"));
        assert_eq!(released, vec![10, 0]);
    }

    #[test]
    fn success_releases_nothing() {
        let mut released = Vec::new();
        let result: Result<_, ()> = create_all(3, Ok, |h| released.push(h));

        assert_eq!(result, Ok(vec![0, 1, 2]));
        assert!(released.is_empty());
    }
}
