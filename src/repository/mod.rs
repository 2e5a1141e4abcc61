pub mod rent_roll_repository;
