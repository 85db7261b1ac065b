mod vec_sample_iterator;

pub use vec_sample_iterator::VecSampleIterator;
